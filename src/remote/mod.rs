//! Remote entries, manifests, and the pluggable loading seam.
//!
//! A remote is an independently deployed module. The shell knows each one by
//! a [`RemoteEntry`] (`remoteApp1@http://localhost:3001/remoteEntry.json`);
//! fetching the entry yields a [`RemoteDescriptor`] listing the units the
//! remote exposes and the shared dependencies it declares.
//!
//! # Architecture
//!
//! - [`RemoteLoader`] - Async trait abstracting fetch + materialize
//! - [`HttpRemoteLoader`] - Fetches manifests over HTTP, materializes from a [`UnitCatalog`]
//! - [`InMemoryRemoteLoader`] - Serves static manifests; offline demos and tests
//! - [`HttpManifestFetcher`] - Stateless one-request-per-call manifest fetcher
//! - [`UnitCatalog`] - Loader reference to unit factory registry
//!
//! The loader is injected into the resolver, so swapping the transport never
//! touches the ledger, resolver, or coordinator.

mod catalog;
mod error;
mod http;
mod http_client;
mod memory;

pub use catalog::{UnitCatalog, UnitFactory};
pub use error::{FetchError, NetworkFailure, RemoteEntryError};
pub use http::{HttpManifestFetcher, HttpRemoteLoader};
pub use http_client::{ClientSetupError, DEFAULT_FETCH_TIMEOUT, MAX_MANIFEST_BYTES};
pub use memory::InMemoryRemoteLoader;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::ledger::{ResolvedDependency, SharedDependencySpec};
use crate::resolver::LoadError;
use crate::unit::UnitRef;

/// A configured remote: identifier, container scope, and entry URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Identifier the shell uses to request units (e.g. `remoteApp1`).
    pub id: String,
    /// Container name the remote's manifest must declare.
    pub scope: String,
    /// Absolute URL of the remote's entry manifest.
    pub entry_url: Url,
}

impl RemoteEntry {
    /// Parses `scope@url`, or a bare absolute URL (scope defaults to `id`).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteEntryError`] for empty scopes, relative URLs, or
    /// schemes other than http/https.
    pub fn parse(id: &str, value: &str) -> Result<Self, RemoteEntryError> {
        let value = value.trim();
        if id.trim().is_empty() || value.is_empty() {
            return Err(RemoteEntryError::Malformed {
                remote_id: id.to_string(),
                value: value.to_string(),
                reason: "remote id and entry must not be empty".to_string(),
            });
        }

        let (scope, raw_url) = match value.split_once('@') {
            Some((scope, rest)) if !scope.contains([':', '/']) => (scope.trim(), rest.trim()),
            _ => (id, value),
        };
        if scope.is_empty() {
            return Err(RemoteEntryError::Malformed {
                remote_id: id.to_string(),
                value: value.to_string(),
                reason: "scope before '@' is empty".to_string(),
            });
        }

        let entry_url = Url::parse(raw_url).map_err(|error| RemoteEntryError::InvalidUrl {
            remote_id: id.to_string(),
            url: raw_url.to_string(),
            reason: error.to_string(),
        })?;
        if !matches!(entry_url.scheme(), "http" | "https") {
            return Err(RemoteEntryError::UnsupportedScheme {
                remote_id: id.to_string(),
                scheme: entry_url.scheme().to_string(),
            });
        }

        Ok(Self {
            id: id.to_string(),
            scope: scope.to_string(),
            entry_url,
        })
    }
}

/// Static mapping of remote identifier to [`RemoteEntry`], supplied at startup.
#[derive(Debug, Clone, Default)]
pub struct RemoteDirectory {
    entries: BTreeMap<String, RemoteEntry>,
}

impl RemoteDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, entry: RemoteEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    /// Parses and adds every `(id, scope@url)` pair.
    ///
    /// # Errors
    ///
    /// Returns the first [`RemoteEntryError`]; earlier pairs stay inserted.
    pub fn extend_from_specs<'a, I>(&mut self, specs: I) -> Result<(), RemoteEntryError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (id, value) in specs {
            self.insert(RemoteEntry::parse(id, value)?);
        }
        Ok(())
    }

    /// Looks up a remote by identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RemoteEntry> {
        self.entries.get(id)
    }

    /// Returns configured identifiers in order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Iterates entries in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &RemoteEntry> {
        self.entries.values()
    }

    /// Returns the number of configured remotes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no remotes are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Logical schema of a remote entry manifest.
///
/// ```json
/// {
///   "name": "remoteApp1",
///   "exposes": { "./App": "remoteApp1/App" },
///   "shared": [{ "name": "react", "version": "18.2.0", "singleton": true, "requiredVersion": "^18.2.0" }]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestDocument {
    /// Container name; must match the configured scope.
    pub name: String,
    /// Exposed unit path to loader reference.
    #[serde(default)]
    pub exposes: BTreeMap<String, String>,
    /// Shared dependencies the remote declares.
    #[serde(default)]
    pub shared: Vec<SharedDependencySpec>,
}

impl ManifestDocument {
    /// Creates an empty manifest for container `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exposes: BTreeMap::new(),
            shared: Vec::new(),
        }
    }

    /// Adds an exposed unit.
    #[must_use]
    pub fn expose(mut self, path: impl Into<String>, loader_ref: impl Into<String>) -> Self {
        self.exposes.insert(path.into(), loader_ref.into());
        self
    }

    /// Adds a shared dependency declaration.
    #[must_use]
    pub fn share(mut self, spec: SharedDependencySpec) -> Self {
        self.shared.push(spec);
        self
    }
}

/// Immutable description of a fetched remote.
#[derive(Debug, Clone)]
pub struct RemoteDescriptor {
    /// Remote identifier.
    pub id: String,
    /// Container scope declared by the manifest.
    pub scope: String,
    /// URL the manifest was fetched from.
    pub entry_url: Url,
    /// Normalized unit path to loader reference.
    pub exposed_units: BTreeMap<String, String>,
    /// Shared dependencies the remote declares.
    pub shared: Vec<SharedDependencySpec>,
}

impl RemoteDescriptor {
    /// Validates a manifest against its configured entry.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Parse`] when the container name does not match
    /// the scope, an exposed path or loader reference is empty, two exposed
    /// paths normalize to the same unit, or a shared dependency is declared
    /// twice.
    pub fn from_manifest(entry: &RemoteEntry, manifest: ManifestDocument) -> Result<Self, FetchError> {
        let url = entry.entry_url.as_str();
        if manifest.name != entry.scope {
            return Err(FetchError::parse(
                &entry.id,
                url,
                &format!(
                    "manifest declares container '{}', expected '{}'",
                    manifest.name, entry.scope
                ),
            ));
        }

        let mut exposed_units = BTreeMap::new();
        for (path, loader_ref) in manifest.exposes {
            if path.trim().is_empty() || loader_ref.trim().is_empty() {
                return Err(FetchError::parse(
                    &entry.id,
                    url,
                    "exposed unit path and loader reference must not be empty",
                ));
            }
            let normalized = normalize_unit_path(&path);
            if exposed_units.contains_key(&normalized) {
                return Err(FetchError::parse(
                    &entry.id,
                    url,
                    &format!("exposed unit '{path}' duplicates '{normalized}'"),
                ));
            }
            exposed_units.insert(normalized, loader_ref);
        }

        let mut seen = BTreeSet::new();
        for spec in &manifest.shared {
            if !seen.insert(spec.name.as_str()) {
                return Err(FetchError::parse(
                    &entry.id,
                    url,
                    &format!("shared dependency '{}' declared more than once", spec.name),
                ));
            }
        }

        Ok(Self {
            id: entry.id.clone(),
            scope: manifest.name,
            entry_url: entry.entry_url.clone(),
            exposed_units,
            shared: manifest.shared,
        })
    }

    /// Returns the loader reference for an exposed unit path.
    #[must_use]
    pub fn loader_ref(&self, unit_path: &str) -> Option<&str> {
        self.exposed_units
            .get(&normalize_unit_path(unit_path))
            .map(String::as_str)
    }

    /// Returns the exposed unit paths.
    #[must_use]
    pub fn exposed_paths(&self) -> Vec<String> {
        self.exposed_units.keys().cloned().collect()
    }
}

/// Normalizes an exposed unit path to the `./Name` form manifests use.
///
/// `App`, `/App` and `./App` all normalize to `./App`.
#[must_use]
pub fn normalize_unit_path(path: &str) -> String {
    let trimmed = path.trim();
    let bare = trimmed
        .strip_prefix("./")
        .or_else(|| trimmed.strip_prefix('/'))
        .unwrap_or(trimmed);
    format!("./{bare}")
}

/// Strategy for turning a remote entry into a descriptor, and a descriptor
/// path into a unit.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Arc<dyn RemoteLoader>`.
#[async_trait]
pub trait RemoteLoader: Send + Sync {
    /// Returns the loader's name (e.g. "http", "in-memory").
    fn name(&self) -> &str;

    /// Retrieves and parses the remote's entry manifest.
    ///
    /// Must not cache: memoization belongs to the caller.
    async fn fetch(
        &self,
        entry: &RemoteEntry,
        timeout: Duration,
    ) -> Result<RemoteDescriptor, FetchError>;

    /// Materializes one exposed unit against already-reconciled dependencies.
    fn materialize(
        &self,
        descriptor: &RemoteDescriptor,
        unit_path: &str,
        dependencies: &[ResolvedDependency],
    ) -> Result<UnitRef, LoadError>;
}
