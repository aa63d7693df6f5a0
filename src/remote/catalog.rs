//! Loader reference to unit factory registry.
//!
//! Rust cannot execute code fetched from a remote, so materialization maps
//! the loader reference a manifest publishes (`remoteApp1/App`) onto a
//! factory registered in-process. The [`UnitCatalog`] is that mapping.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::ledger::ResolvedDependency;
use crate::resolver::LoadError;
use crate::unit::{StaticUnit, UnitFailure, UnitRef};

use super::RemoteDescriptor;

/// Builds a unit from the dependencies its remote was reconciled against.
pub type UnitFactory =
    Arc<dyn Fn(&[ResolvedDependency]) -> Result<UnitRef, UnitFailure> + Send + Sync>;

/// Registry of unit factories keyed by loader reference.
#[derive(Clone, Default)]
pub struct UnitCatalog {
    factories: BTreeMap<String, UnitFactory>,
}

impl UnitCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `loader_ref`, replacing any previous one.
    pub fn register<F>(&mut self, loader_ref: impl Into<String>, factory: F)
    where
        F: Fn(&[ResolvedDependency]) -> Result<UnitRef, UnitFailure> + Send + Sync + 'static,
    {
        let loader_ref = loader_ref.into();
        debug!(loader_ref = %loader_ref, "Registering unit factory");
        self.factories.insert(loader_ref, Arc::new(factory));
    }

    /// Registers a [`StaticUnit`] that renders `body` plus its dependency labels.
    pub fn register_static(&mut self, loader_ref: impl Into<String>, body: impl Into<String>) {
        let loader_ref = loader_ref.into();
        let name = loader_ref.clone();
        let body = body.into();
        self.register(loader_ref, move |dependencies: &[ResolvedDependency]| {
            let labels = dependencies.iter().map(ResolvedDependency::label).collect();
            let unit: UnitRef =
                Arc::new(StaticUnit::new(name.clone(), body.clone()).with_dependencies(labels));
            Ok(unit)
        });
    }

    /// Returns true if a factory is registered for `loader_ref`.
    #[must_use]
    pub fn contains(&self, loader_ref: &str) -> bool {
        self.factories.contains_key(loader_ref)
    }

    /// Returns the number of registered factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no factories are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Materializes the unit a descriptor exposes at `unit_path`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::UnitNotExposed`] if the descriptor lacks the path,
    /// or [`LoadError::MaterializeFailed`] if no factory is registered for
    /// its loader reference or the factory fails.
    pub fn materialize(
        &self,
        descriptor: &RemoteDescriptor,
        unit_path: &str,
        dependencies: &[ResolvedDependency],
    ) -> Result<UnitRef, LoadError> {
        let Some(loader_ref) = descriptor.loader_ref(unit_path) else {
            return Err(LoadError::unit_not_exposed(
                &descriptor.id,
                unit_path,
                descriptor.exposed_paths(),
            ));
        };
        let Some(factory) = self.factories.get(loader_ref) else {
            return Err(LoadError::materialize_failed(
                &descriptor.id,
                unit_path,
                &format!("no unit registered for loader reference '{loader_ref}'"),
            ));
        };
        factory(dependencies).map_err(|failure| {
            LoadError::materialize_failed(&descriptor.id, unit_path, &failure.message)
        })
    }
}

impl std::fmt::Debug for UnitCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let refs: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        f.debug_struct("UnitCatalog")
            .field("factory_count", &self.factories.len())
            .field("loader_refs", &refs)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ledger::{SharedDependencySpec, SharedLedger};
    use crate::remote::{ManifestDocument, RemoteEntry};

    fn descriptor() -> RemoteDescriptor {
        let entry =
            RemoteEntry::parse("remoteApp1", "remoteApp1@http://localhost:3001/remoteEntry.json")
                .unwrap();
        let manifest = ManifestDocument::new("remoteApp1")
            .expose("./App", "remoteApp1/App")
            .expose("./Broken", "remoteApp1/Broken");
        RemoteDescriptor::from_manifest(&entry, manifest).unwrap()
    }

    #[test]
    fn test_catalog_debug_shows_refs() {
        let mut catalog = UnitCatalog::new();
        catalog.register_static("remoteApp1/App", "Dashboard");
        let debug_str = format!("{catalog:?}");
        assert!(debug_str.contains("remoteApp1/App"));
        assert!(debug_str.contains("factory_count: 1"));
    }

    #[test]
    fn test_materialize_static_unit_with_dependencies() {
        let mut catalog = UnitCatalog::new();
        catalog.register_static("remoteApp1/App", "Dashboard");

        let ledger = SharedLedger::new();
        let deps = vec![
            ledger
                .register("remoteApp1", &SharedDependencySpec::singleton("react", "18.2.0").unwrap())
                .unwrap(),
        ];
        let unit = catalog.materialize(&descriptor(), "./App", &deps).unwrap();
        assert_eq!(unit.name(), "remoteApp1/App");
        assert_eq!(unit.render().unwrap(), "Dashboard [react@18.2.0]");
    }

    #[test]
    fn test_materialize_unexposed_path() {
        let catalog = UnitCatalog::new();
        let err = catalog.materialize(&descriptor(), "./Missing", &[]).unwrap_err();
        assert!(matches!(err, LoadError::UnitNotExposed { .. }));
    }

    #[test]
    fn test_materialize_without_factory() {
        let catalog = UnitCatalog::new();
        let err = catalog.materialize(&descriptor(), "./App", &[]).unwrap_err();
        assert!(matches!(err, LoadError::MaterializeFailed { .. }));
        assert!(err.to_string().contains("remoteApp1/App"));
    }

    #[test]
    fn test_materialize_factory_failure() {
        let mut catalog = UnitCatalog::new();
        catalog.register("remoteApp1/Broken", |_deps: &[ResolvedDependency]| {
            Err(UnitFailure::new("bundle missing export"))
        });
        let err = catalog.materialize(&descriptor(), "./Broken", &[]).unwrap_err();
        assert!(err.to_string().contains("bundle missing export"));
    }

    #[test]
    fn test_catalog_len_and_contains() {
        let mut catalog = UnitCatalog::new();
        assert!(catalog.is_empty());
        catalog.register_static("a", "A");
        catalog.register("b", |_deps: &[ResolvedDependency]| {
            let unit: UnitRef = Arc::new(StaticUnit::new("b", "B"));
            Ok(unit)
        });
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("a"));
        assert!(!catalog.contains("c"));
    }
}
