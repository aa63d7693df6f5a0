//! Error types for unit resolution.
//!
//! Every failure between "shell requests a unit" and "unit reference handed
//! to the boundary" ends up as a [`LoadError`], which the coordinator stores
//! in a terminal `Failed` load state. It is `Clone` so every consumer of the
//! same key observes the same error.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::remote::FetchError;

/// Coarse classification of a load failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Manifest unreachable or timed out.
    Network,
    /// Manifest malformed.
    Parse,
    /// Remote identifier not configured.
    RemoteNotFound,
    /// Unit path absent from a fetched manifest.
    UnitNotExposed,
    /// Singleton dependency incompatibility.
    VersionConflict,
    /// Other shared dependency failure (invalid version or range).
    DependencyUnsatisfied,
    /// The loader could not build the unit.
    MaterializeFailed,
    /// The resolution task panicked or was torn down.
    Interrupted,
}

/// Errors that can occur while resolving a remote unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The remote's manifest could not be fetched or parsed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// No remote is configured under this identifier
    #[error(
        "remote '{remote_id}' is not configured (known: {})\n  Suggestion: Add it to the shell's remotes or fix the identifier",
        .known.join(", ")
    )]
    RemoteNotFound {
        /// The unknown remote identifier
        remote_id: String,
        /// Identifiers that are configured
        known: Vec<String>,
    },

    /// The remote's manifest does not expose this unit
    #[error(
        "remote '{remote_id}' does not expose '{unit_path}' (exposes: {})\n  Suggestion: Check the exposed unit path against the remote's manifest",
        .exposed.join(", ")
    )]
    UnitNotExposed {
        /// Remote that was fetched successfully
        remote_id: String,
        /// The requested unit path
        unit_path: String,
        /// Paths the remote does expose
        exposed: Vec<String>,
    },

    /// A shared dependency declared by the remote could not be reconciled
    #[error("shared dependencies of '{remote_id}' are unsatisfied: {source}")]
    DependencyUnsatisfied {
        /// Remote whose declarations were rejected
        remote_id: String,
        /// Ledger rejection
        #[source]
        source: LedgerError,
    },

    /// The loader failed to build the unit
    #[error("failed to materialize '{unit_path}' from '{remote_id}': {reason}")]
    MaterializeFailed {
        /// Remote the unit belongs to
        remote_id: String,
        /// The requested unit path
        unit_path: String,
        /// Why materialization failed
        reason: String,
    },

    /// Resolution stopped before producing a result
    #[error("resolution of '{unit_path}' from '{remote_id}' was interrupted: {reason}")]
    Interrupted {
        /// Remote the unit belongs to
        remote_id: String,
        /// The requested unit path
        unit_path: String,
        /// Panic message or teardown cause
        reason: String,
    },
}

impl LoadError {
    /// Creates a `RemoteNotFound` error.
    #[must_use]
    pub fn remote_not_found(remote_id: &str, known: Vec<String>) -> Self {
        Self::RemoteNotFound {
            remote_id: remote_id.to_string(),
            known,
        }
    }

    /// Creates a `UnitNotExposed` error.
    #[must_use]
    pub fn unit_not_exposed(remote_id: &str, unit_path: &str, exposed: Vec<String>) -> Self {
        Self::UnitNotExposed {
            remote_id: remote_id.to_string(),
            unit_path: unit_path.to_string(),
            exposed,
        }
    }

    /// Creates a `DependencyUnsatisfied` error.
    #[must_use]
    pub fn dependency_unsatisfied(remote_id: &str, source: LedgerError) -> Self {
        Self::DependencyUnsatisfied {
            remote_id: remote_id.to_string(),
            source,
        }
    }

    /// Creates a `MaterializeFailed` error.
    #[must_use]
    pub fn materialize_failed(remote_id: &str, unit_path: &str, reason: &str) -> Self {
        Self::MaterializeFailed {
            remote_id: remote_id.to_string(),
            unit_path: unit_path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates an `Interrupted` error.
    #[must_use]
    pub fn interrupted(remote_id: &str, unit_path: &str, reason: &str) -> Self {
        Self::Interrupted {
            remote_id: remote_id.to_string(),
            unit_path: unit_path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(FetchError::Network { .. }) => ErrorKind::Network,
            Self::Fetch(FetchError::Parse { .. }) => ErrorKind::Parse,
            Self::RemoteNotFound { .. } => ErrorKind::RemoteNotFound,
            Self::UnitNotExposed { .. } => ErrorKind::UnitNotExposed,
            Self::DependencyUnsatisfied { source, .. } if source.is_version_conflict() => {
                ErrorKind::VersionConflict
            }
            Self::DependencyUnsatisfied { .. } => ErrorKind::DependencyUnsatisfied,
            Self::MaterializeFailed { .. } => ErrorKind::MaterializeFailed,
            Self::Interrupted { .. } => ErrorKind::Interrupted,
        }
    }

    /// Returns the ledger error behind a dependency failure.
    #[must_use]
    pub fn ledger_error(&self) -> Option<&LedgerError> {
        match self {
            Self::DependencyUnsatisfied { source, .. } => Some(source),
            _ => None,
        }
    }
}
