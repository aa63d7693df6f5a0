//! In-memory remote loader.
//!
//! Serves manifests from a static table keyed by entry URL, with optional
//! simulated latency. Used for offline shells and as the test double behind
//! the resolver and coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::ledger::ResolvedDependency;
use crate::resolver::LoadError;
use crate::unit::UnitRef;

use super::{
    FetchError, ManifestDocument, NetworkFailure, RemoteDescriptor, RemoteEntry, RemoteLoader,
    UnitCatalog,
};

#[derive(Debug, Clone)]
enum Served {
    Manifest(ManifestDocument),
    Status(u16),
    Malformed(String),
}

/// Loader backed by a static manifest table.
#[derive(Debug, Default)]
pub struct InMemoryRemoteLoader {
    served: HashMap<String, Served>,
    catalog: UnitCatalog,
    latency: Duration,
    fetches: AtomicUsize,
}

impl InMemoryRemoteLoader {
    /// Creates a loader with an empty table and no latency.
    #[must_use]
    pub fn new(catalog: UnitCatalog) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    /// Serves `manifest` at `entry_url`.
    #[must_use]
    pub fn with_manifest(mut self, entry_url: &str, manifest: ManifestDocument) -> Self {
        self.served
            .insert(entry_url.to_string(), Served::Manifest(manifest));
        self
    }

    /// Answers `entry_url` with an HTTP error status.
    #[must_use]
    pub fn with_status(mut self, entry_url: &str, status: u16) -> Self {
        self.served.insert(entry_url.to_string(), Served::Status(status));
        self
    }

    /// Answers `entry_url` with a payload that fails to parse.
    #[must_use]
    pub fn with_malformed(mut self, entry_url: &str, reason: &str) -> Self {
        self.served
            .insert(entry_url.to_string(), Served::Malformed(reason.to_string()));
        self
    }

    /// Delays every fetch by `latency`.
    ///
    /// A latency longer than the fetch timeout produces a timeout error
    /// after the timeout elapses.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns how many fetches have been issued.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteLoader for InMemoryRemoteLoader {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn fetch(
        &self,
        entry: &RemoteEntry,
        timeout: Duration,
    ) -> Result<RemoteDescriptor, FetchError> {
        let fetch_number = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let url = entry.entry_url.as_str();
        debug!(remote = %entry.id, url, fetch_number, "Serving in-memory manifest");

        if self.latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(FetchError::timeout(&entry.id, url, timeout));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.served.get(url) {
            Some(Served::Manifest(manifest)) => {
                RemoteDescriptor::from_manifest(entry, manifest.clone())
            }
            Some(Served::Status(status)) => Err(FetchError::network(
                &entry.id,
                url,
                NetworkFailure::HttpStatus(*status),
                "served status",
            )),
            Some(Served::Malformed(reason)) => Err(FetchError::parse(&entry.id, url, reason)),
            None => Err(FetchError::network(
                &entry.id,
                url,
                NetworkFailure::HttpStatus(404),
                "no manifest served at this URL",
            )),
        }
    }

    fn materialize(
        &self,
        descriptor: &RemoteDescriptor,
        unit_path: &str,
        dependencies: &[ResolvedDependency],
    ) -> Result<UnitRef, LoadError> {
        self.catalog.materialize(descriptor, unit_path, dependencies)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const URL: &str = "http://localhost:3001/remoteEntry.json";

    fn entry() -> RemoteEntry {
        RemoteEntry::parse("remoteApp1", &format!("remoteApp1@{URL}")).unwrap()
    }

    #[tokio::test]
    async fn test_serves_manifest_and_counts_fetches() {
        let loader = InMemoryRemoteLoader::new(UnitCatalog::new())
            .with_manifest(URL, ManifestDocument::new("remoteApp1").expose("./App", "a"));
        let descriptor = loader.fetch(&entry(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(descriptor.loader_ref("./App"), Some("a"));
        loader.fetch(&entry(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(loader.fetch_count(), 2, "loaders never cache");
    }

    #[tokio::test]
    async fn test_unknown_url_is_404() {
        let loader = InMemoryRemoteLoader::new(UnitCatalog::new());
        let err = loader.fetch(&entry(), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.network_failure(), Some(NetworkFailure::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_malformed_is_parse_error() {
        let loader =
            InMemoryRemoteLoader::new(UnitCatalog::new()).with_malformed(URL, "trailing comma");
        let err = loader.fetch(&entry(), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_beyond_timeout_times_out() {
        let loader = InMemoryRemoteLoader::new(UnitCatalog::new())
            .with_manifest(URL, ManifestDocument::new("remoteApp1"))
            .with_latency(Duration::from_secs(30));
        let err = loader
            .fetch(&entry(), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err.network_failure(), Some(NetworkFailure::Timeout));
    }
}
