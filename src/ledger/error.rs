//! Error types for shared dependency reconciliation.
//!
//! This module defines structured errors for the shared dependency ledger,
//! following the What/Why/Fix pattern used across the project.

use semver::Version;
use thiserror::Error;

/// Errors that can occur while registering or looking up shared dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A singleton dependency is already resolved to a version outside the requester's range
    #[error(
        "version conflict for singleton '{name}': resolved {resolved_version} (required by {}) does not satisfy '{required_range}' requested by '{requester}' for {rejected_version}\n  Suggestion: Align the shared dependency range across the shell and all remotes",
        .requesters.join(", ")
    )]
    VersionConflict {
        /// The shared dependency name
        name: String,
        /// The version already in use that the requester cannot share
        resolved_version: Version,
        /// The version the rejected requester declared
        rejected_version: Version,
        /// The range the rejected requester declared
        required_range: String,
        /// The requester whose registration was rejected
        requester: String,
        /// Requesters already running that version
        requesters: Vec<String>,
    },

    /// No entry exists for the requested dependency
    #[error(
        "shared dependency '{name}' is not registered\n  Suggestion: Declare it in the shell's shared dependencies or load a remote that provides it"
    )]
    NotRegistered {
        /// The dependency name that was looked up
        name: String,
    },

    /// A declared version is not a valid semantic version
    #[error("invalid version '{value}' for shared dependency '{name}': {reason}")]
    InvalidVersion {
        /// The dependency name
        name: String,
        /// The unparseable version string
        value: String,
        /// Why parsing failed
        reason: String,
    },

    /// A declared version range cannot be parsed
    #[error("invalid version range '{value}': {reason}")]
    InvalidRange {
        /// The unparseable range string
        value: String,
        /// Why parsing failed
        reason: String,
    },
}

impl LedgerError {
    /// Creates a `NotRegistered` error.
    #[must_use]
    pub fn not_registered(name: &str) -> Self {
        Self::NotRegistered {
            name: name.to_string(),
        }
    }

    /// Creates an `InvalidVersion` error.
    #[must_use]
    pub fn invalid_version(name: &str, value: &str, reason: &str) -> Self {
        Self::InvalidVersion {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates an `InvalidRange` error.
    #[must_use]
    pub fn invalid_range(value: &str, reason: &str) -> Self {
        Self::InvalidRange {
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for a singleton version conflict.
    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
