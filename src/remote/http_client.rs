//! HTTP client construction policy for manifest fetching.
//!
//! Connect timeout, user-agent, and compression are fixed here; the overall
//! request timeout is supplied per fetch by the caller.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Proxy};
use thiserror::Error;
use tracing::warn;

use crate::user_agent;

/// Connect timeout applied to every manifest request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request timeout used when the shell configuration does not set one.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest manifest body accepted, after decompression.
pub const MAX_MANIFEST_BYTES: usize = 1024 * 1024;

/// Errors from constructing the manifest HTTP client.
#[derive(Debug, Error)]
pub enum ClientSetupError {
    /// The builder panicked, even with system proxy lookup disabled
    #[error(
        "HTTP client construction panicked\n  Suggestion: Set HTTPS_PROXY/HTTP_PROXY explicitly or check the system proxy configuration"
    )]
    Panicked,

    /// The builder rejected its configuration
    #[error("HTTP client construction failed: {0}")]
    Build(#[source] reqwest::Error),
}

/// Builds the manifest HTTP client.
///
/// Some sandboxed environments panic while querying system proxy settings;
/// on panic the builder is retried with system lookup disabled and only the
/// `*_PROXY` environment variables honored.
pub(crate) fn build_manifest_http_client() -> Result<Client, ClientSetupError> {
    match try_build_client(false) {
        Err(ClientSetupError::Panicked) => {
            warn!("Manifest client hit system proxy panic; using env-proxy fallback builder");
            try_build_client(true)
        }
        other => other,
    }
}

fn try_build_client(disable_system_proxy_lookup: bool) -> Result<Client, ClientSetupError> {
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(user_agent::default_manifest_user_agent())
            .gzip(true);
        if disable_system_proxy_lookup {
            builder = with_env_proxies(builder.no_proxy());
        }
        builder.build().map_err(ClientSetupError::Build)
    }))
    .map_err(|_| ClientSetupError::Panicked)?
}

fn with_env_proxies(mut builder: ClientBuilder) -> ClientBuilder {
    let https = first_env(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]);
    if let Some(proxy) = https
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    let http = first_env(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]);
    if let Some(proxy) = http
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn first_env(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
