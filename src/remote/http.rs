//! Manifest fetching over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::{debug, info, instrument};

use crate::ledger::ResolvedDependency;
use crate::resolver::LoadError;
use crate::unit::UnitRef;

use super::http_client::{ClientSetupError, MAX_MANIFEST_BYTES, build_manifest_http_client};
use super::{
    FetchError, ManifestDocument, NetworkFailure, RemoteDescriptor, RemoteEntry, RemoteLoader,
    UnitCatalog,
};

/// Stateless manifest fetcher: one GET per call, no caching.
#[derive(Debug, Clone)]
pub struct HttpManifestFetcher {
    client: Client,
}

impl HttpManifestFetcher {
    /// Creates a fetcher with the shared client policy.
    ///
    /// # Errors
    ///
    /// Returns [`ClientSetupError`] if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, ClientSetupError> {
        Ok(Self {
            client: build_manifest_http_client()?,
        })
    }

    /// Creates a fetcher around an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetches and validates `entry`'s manifest within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] on timeout, connection failure, or a
    /// non-success status, and [`FetchError::Parse`] when the payload is not
    /// a valid manifest for this entry or exceeds [`MAX_MANIFEST_BYTES`]. A
    /// partial descriptor is never returned.
    #[instrument(skip(self, entry), fields(remote = %entry.id, url = %entry.entry_url))]
    pub async fn fetch_manifest(
        &self,
        entry: &RemoteEntry,
        timeout: Duration,
    ) -> Result<RemoteDescriptor, FetchError> {
        let url = entry.entry_url.as_str();
        debug!(timeout_ms = timeout.as_millis(), "Fetching remote manifest");

        let response = self
            .client
            .get(entry.entry_url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|error| classify_transport_error(entry, timeout, &error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::network(
                &entry.id,
                url,
                NetworkFailure::HttpStatus(status.as_u16()),
                status.canonical_reason().unwrap_or("unexpected status"),
            ));
        }

        let body = read_bounded_body(entry, timeout, response).await?;
        let manifest: ManifestDocument = serde_json::from_slice(&body)
            .map_err(|error| FetchError::parse(&entry.id, url, &error.to_string()))?;
        let descriptor = RemoteDescriptor::from_manifest(entry, manifest)?;

        info!(
            exposed = descriptor.exposed_units.len(),
            shared = descriptor.shared.len(),
            "Fetched remote manifest"
        );
        Ok(descriptor)
    }
}

async fn read_bounded_body(
    entry: &RemoteEntry,
    timeout: Duration,
    mut response: Response,
) -> Result<Vec<u8>, FetchError> {
    let too_large = |size: String| {
        FetchError::parse(
            &entry.id,
            entry.entry_url.as_str(),
            &format!("manifest body of {size} bytes exceeds the {MAX_MANIFEST_BYTES} byte limit"),
        )
    };
    if let Some(length) = response.content_length()
        && length > MAX_MANIFEST_BYTES as u64
    {
        return Err(too_large(length.to_string()));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|error| classify_transport_error(entry, timeout, &error))?
    {
        if body.len() + chunk.len() > MAX_MANIFEST_BYTES {
            return Err(too_large(format!("more than {MAX_MANIFEST_BYTES}")));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn classify_transport_error(
    entry: &RemoteEntry,
    timeout: Duration,
    error: &reqwest::Error,
) -> FetchError {
    let url = entry.entry_url.as_str();
    if error.is_timeout() {
        FetchError::timeout(&entry.id, url, timeout)
    } else if error.is_connect() {
        FetchError::network(&entry.id, url, NetworkFailure::Connect, &error.to_string())
    } else {
        FetchError::network(&entry.id, url, NetworkFailure::Transport, &error.to_string())
    }
}

/// Loader that fetches manifests over HTTP and materializes units from a catalog.
#[derive(Debug, Clone)]
pub struct HttpRemoteLoader {
    fetcher: HttpManifestFetcher,
    catalog: UnitCatalog,
}

impl HttpRemoteLoader {
    /// Creates an HTTP loader backed by `catalog`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientSetupError`] if the HTTP client cannot be constructed.
    pub fn new(catalog: UnitCatalog) -> Result<Self, ClientSetupError> {
        Ok(Self {
            fetcher: HttpManifestFetcher::new()?,
            catalog,
        })
    }

    /// Creates an HTTP loader from an existing fetcher.
    #[must_use]
    pub fn with_fetcher(fetcher: HttpManifestFetcher, catalog: UnitCatalog) -> Self {
        Self { fetcher, catalog }
    }
}

#[async_trait]
impl RemoteLoader for HttpRemoteLoader {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(
        &self,
        entry: &RemoteEntry,
        timeout: Duration,
    ) -> Result<RemoteDescriptor, FetchError> {
        self.fetcher.fetch_manifest(entry, timeout).await
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

    #[tokio::test]
    async fn test_fetch_connection_refused_is_network_error() {
        let entry = RemoteEntry::parse("app1", "app1@http://127.0.0.1:9/remoteEntry.json").unwrap();
        let fetcher = HttpManifestFetcher::new().unwrap();
        let err = fetcher
            .fetch_manifest(&entry, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(
            matches!(err, FetchError::Network { .. }),
            "expected network error, got {err:?}"
        );
        assert_eq!(err.remote_id(), "app1");
    }

    #[test]
    fn test_http_loader_name() {
        let loader = HttpRemoteLoader::new(UnitCatalog::new()).unwrap();
        assert_eq!(loader.name(), "http");
    }
}
