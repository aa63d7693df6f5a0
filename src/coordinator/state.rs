//! Load keys and load states.

use std::fmt;

use crate::remote::normalize_unit_path;
use crate::resolver::LoadError;
use crate::unit::UnitRef;

/// Cache key: one remote and one exposed unit path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadKey {
    /// Remote identifier.
    pub remote_id: String,
    /// Normalized unit path (`./App`).
    pub unit_path: String,
}

impl LoadKey {
    /// Creates a key, normalizing the unit path so `App` and `./App` coincide.
    #[must_use]
    pub fn new(remote_id: &str, unit_path: &str) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            unit_path: normalize_unit_path(unit_path),
        }
    }
}

impl fmt::Display for LoadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remote_id, self.unit_path)
    }
}

/// State of one load, observed by every consumer of its key.
///
/// Moves from `Pending` to `Ready` or `Failed` exactly once and never again.
#[derive(Debug, Clone)]
pub enum LoadState {
    /// Resolution is in flight.
    Pending,
    /// The unit resolved.
    Ready(UnitRef),
    /// Resolution failed; the error is kept as data.
    Failed(LoadError),
}

impl LoadState {
    /// Returns true for `Ready` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns the resolved unit, if ready.
    #[must_use]
    pub fn unit(&self) -> Option<&UnitRef> {
        match self {
            Self::Ready(unit) => Some(unit),
            _ => None,
        }
    }

    /// Returns the load error, if failed.
    #[must_use]
    pub fn error(&self) -> Option<&LoadError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::resolver::ErrorKind;
    use crate::unit::StaticUnit;

    #[test]
    fn test_key_normalizes_path() {
        assert_eq!(LoadKey::new("app1", "App"), LoadKey::new("app1", "./App"));
        assert_eq!(LoadKey::new("app1", "/App").to_string(), "app1/./App");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!LoadState::Pending.is_terminal());

        let ready = LoadState::Ready(Arc::new(StaticUnit::new("u", "body")));
        assert!(ready.is_terminal());
        assert_eq!(ready.unit().unwrap().name(), "u");
        assert!(ready.error().is_none());

        let failed = LoadState::Failed(LoadError::remote_not_found("x", Vec::new()));
        assert!(failed.is_terminal());
        assert_eq!(failed.error().unwrap().kind(), ErrorKind::RemoteNotFound);
        assert!(failed.unit().is_none());
    }
}
