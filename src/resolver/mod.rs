//! Remote unit resolution.
//!
//! [`ModuleResolver`] turns `(remote_id, unit_path)` into a [`UnitRef`]:
//!
//! 1. Look up the remote in the [`RemoteDirectory`] (`RemoteNotFound` otherwise).
//! 2. Fetch its descriptor through the injected [`RemoteLoader`]. Descriptors
//!    are memoized per remote; concurrent first requests share one fetch and
//!    failed fetches are not remembered.
//! 3. Check the unit path is exposed (`UnitNotExposed` otherwise).
//! 4. Register every shared dependency the remote declares with the
//!    [`SharedLedger`], all or nothing.
//! 5. Only then ask the loader to materialize the unit.

mod error;

pub use error::{ErrorKind, LoadError};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::ledger::SharedLedger;
use crate::remote::{RemoteDescriptor, RemoteDirectory, RemoteLoader, normalize_unit_path};
use crate::unit::UnitRef;

type DescriptorCell = Arc<OnceCell<Arc<RemoteDescriptor>>>;

/// Resolves exposed units of configured remotes.
pub struct ModuleResolver {
    remotes: RemoteDirectory,
    loader: Arc<dyn RemoteLoader>,
    ledger: Arc<SharedLedger>,
    fetch_timeout: Duration,
    descriptors: DashMap<String, DescriptorCell>,
}

impl ModuleResolver {
    /// Creates a resolver over `remotes`, fetching through `loader` and
    /// reconciling shared dependencies in `ledger`.
    #[must_use]
    pub fn new(
        remotes: RemoteDirectory,
        loader: Arc<dyn RemoteLoader>,
        ledger: Arc<SharedLedger>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            remotes,
            loader,
            ledger,
            fetch_timeout,
            descriptors: DashMap::new(),
        }
    }

    /// Returns the configured remotes.
    #[must_use]
    pub fn remotes(&self) -> &RemoteDirectory {
        &self.remotes
    }

    /// Returns the ledger dependencies are registered in.
    #[must_use]
    pub fn ledger(&self) -> &Arc<SharedLedger> {
        &self.ledger
    }

    /// Returns the per-fetch timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Returns the descriptor of `remote_id`, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::RemoteNotFound`] for an unknown remote and
    /// [`LoadError::Fetch`] when the manifest cannot be fetched.
    pub async fn descriptor(&self, remote_id: &str) -> Result<Arc<RemoteDescriptor>, LoadError> {
        let Some(entry) = self.remotes.get(remote_id) else {
            return Err(LoadError::remote_not_found(remote_id, self.remotes.ids()));
        };

        // Clone the cell out so the map shard is not held across the fetch.
        let cell = Arc::clone(
            self.descriptors
                .entry(remote_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );
        if let Some(descriptor) = cell.get() {
            debug!(remote = remote_id, "Descriptor cache hit");
            return Ok(Arc::clone(descriptor));
        }

        let descriptor = cell
            .get_or_try_init(|| async {
                self.loader
                    .fetch(entry, self.fetch_timeout)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(descriptor))
    }

    /// Returns the cached descriptor of `remote_id` without fetching.
    #[must_use]
    pub fn cached_descriptor(&self, remote_id: &str) -> Option<Arc<RemoteDescriptor>> {
        self.descriptors
            .get(remote_id)
            .and_then(|cell| cell.value().get().cloned())
    }

    /// Resolves `unit_path` exposed by `remote_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`]: `RemoteNotFound`, `Fetch`, `UnitNotExposed`,
    /// `DependencyUnsatisfied` (nothing is materialized and the ledger is
    /// left unchanged), or `MaterializeFailed`.
    #[instrument(skip(self), fields(loader = self.loader.name()))]
    pub async fn resolve(&self, remote_id: &str, unit_path: &str) -> Result<UnitRef, LoadError> {
        let unit_path = normalize_unit_path(unit_path);
        let descriptor = self.descriptor(remote_id).await?;

        if descriptor.loader_ref(&unit_path).is_none() {
            return Err(LoadError::unit_not_exposed(
                remote_id,
                &unit_path,
                descriptor.exposed_paths(),
            ));
        }

        let dependencies = self
            .ledger
            .register_all(remote_id, &descriptor.shared)
            .map_err(|source| {
                warn!(remote = remote_id, error = %source, "Shared dependencies rejected");
                LoadError::dependency_unsatisfied(remote_id, source)
            })?;

        let unit = self
            .loader
            .materialize(&descriptor, &unit_path, &dependencies)?;
        info!(
            unit = unit.name(),
            dependencies = dependencies.len(),
            "Resolved remote unit"
        );
        Ok(unit)
    }
}

impl std::fmt::Debug for ModuleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleResolver")
            .field("remotes", &self.remotes.ids())
            .field("loader", &self.loader.name())
            .field("fetch_timeout", &self.fetch_timeout)
            .field("cached_descriptors", &self.descriptors.len())
            .finish_non_exhaustive()
    }
}
