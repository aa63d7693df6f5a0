//! Error types for remote entries and manifest fetching.

use std::fmt;

use thiserror::Error;

/// Errors from parsing a configured remote entry (`scope@url`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteEntryError {
    /// The entry string is empty or has an empty scope
    #[error(
        "malformed remote entry '{value}' for '{remote_id}': {reason}\n  Suggestion: Use 'scope@https://host/remoteEntry.json' or an absolute URL"
    )]
    Malformed {
        /// Remote identifier being configured
        remote_id: String,
        /// The rejected entry string
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// The entry URL is not an absolute URL
    #[error("invalid entry URL '{url}' for remote '{remote_id}': {reason}")]
    InvalidUrl {
        /// Remote identifier being configured
        remote_id: String,
        /// The rejected URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// The entry URL uses a scheme other than http/https
    #[error(
        "unsupported scheme '{scheme}' in entry URL for remote '{remote_id}'\n  Suggestion: Serve the remote entry over http or https"
    )]
    UnsupportedScheme {
        /// Remote identifier being configured
        remote_id: String,
        /// The rejected scheme
        scheme: String,
    },
}

/// Network-level cause of a failed manifest fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    /// No response within the caller-supplied timeout.
    Timeout,
    /// Connection could not be established (DNS, refused, TLS).
    Connect,
    /// The entry endpoint answered with a non-success status.
    HttpStatus(u16),
    /// The request or response body failed in transit.
    Transport,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Connect => f.write_str("connection failed"),
            Self::HttpStatus(status) => write!(f, "HTTP {status}"),
            Self::Transport => f.write_str("transport error"),
        }
    }
}

/// Errors from retrieving and parsing a remote's entry manifest.
///
/// Causes are carried as strings so the error can be cloned into every
/// consumer observing the same failed load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The manifest could not be retrieved
    #[error(
        "network error fetching manifest for '{remote_id}' from {url} ({kind}): {reason}\n  Suggestion: Check that the remote is deployed and reachable"
    )]
    Network {
        /// Remote whose manifest was requested
        remote_id: String,
        /// Entry URL that was requested
        url: String,
        /// Network-level classification
        kind: NetworkFailure,
        /// Underlying cause
        reason: String,
    },

    /// The manifest payload is not a valid remote entry manifest
    #[error(
        "malformed manifest for '{remote_id}' from {url}: {reason}\n  Suggestion: Check the remote's build output for a valid entry manifest"
    )]
    Parse {
        /// Remote whose manifest was requested
        remote_id: String,
        /// Entry URL that was requested
        url: String,
        /// Why the payload was rejected
        reason: String,
    },
}

impl FetchError {
    /// Creates a `Network` error.
    #[must_use]
    pub fn network(remote_id: &str, url: &str, kind: NetworkFailure, reason: &str) -> Self {
        Self::Network {
            remote_id: remote_id.to_string(),
            url: url.to_string(),
            kind,
            reason: reason.to_string(),
        }
    }

    /// Creates a `Network` error of kind [`NetworkFailure::Timeout`].
    #[must_use]
    pub fn timeout(remote_id: &str, url: &str, after: std::time::Duration) -> Self {
        Self::network(
            remote_id,
            url,
            NetworkFailure::Timeout,
            &format!("no response within {}ms", after.as_millis()),
        )
    }

    /// Creates a `Parse` error.
    #[must_use]
    pub fn parse(remote_id: &str, url: &str, reason: &str) -> Self {
        Self::Parse {
            remote_id: remote_id.to_string(),
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns the remote the failed fetch was for.
    #[must_use]
    pub fn remote_id(&self) -> &str {
        match self {
            Self::Network { remote_id, .. } | Self::Parse { remote_id, .. } => remote_id,
        }
    }

    /// Returns the network failure kind, if this is a network error.
    #[must_use]
    pub fn network_failure(&self) -> Option<NetworkFailure> {
        match self {
            Self::Network { kind, .. } => Some(*kind),
            Self::Parse { .. } => None,
        }
    }
}
