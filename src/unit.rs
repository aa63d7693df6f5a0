//! Consumed-unit contract.
//!
//! A unit is the opaque, independently loadable piece of functionality a
//! remote exposes. The loading core never looks inside one: it only hands
//! a [`UnitRef`] to the composition layer, which invokes [`Unit::render`]
//! inside a [`FaultBoundary`](crate::boundary::FaultBoundary).

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Failure raised by a unit during its own render.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unit failed during render: {message}")]
pub struct UnitFailure {
    /// Human-readable cause reported by the unit.
    pub message: String,
}

impl UnitFailure {
    /// Creates a new render failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The single entry point a resolved unit exposes to the composition layer.
///
/// Implementations must be cheap to share: the coordinator hands the same
/// instance to every consumer of a given `(remote, unit path)` key.
pub trait Unit: Send + Sync {
    /// Returns a stable name for logging and fallback messages.
    fn name(&self) -> &str;

    /// Renders the unit.
    ///
    /// # Errors
    ///
    /// Returns [`UnitFailure`] when the unit cannot produce output. A panic
    /// inside this method is treated the same way by the fault boundary.
    fn render(&self) -> Result<String, UnitFailure>;
}

/// Shared handle to a materialized unit.
pub type UnitRef = Arc<dyn Unit>;

/// A unit that renders a fixed body.
///
/// Used by the binary to stand in for remote code it cannot execute, and by
/// tests as the simplest well-behaved unit.
#[derive(Debug, Clone)]
pub struct StaticUnit {
    name: String,
    body: String,
    dependencies: Vec<String>,
}

impl StaticUnit {
    /// Creates a static unit.
    #[must_use]
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            dependencies: Vec::new(),
        }
    }

    /// Records the shared dependencies the unit was materialized against
    /// (as `name@version`), appended to the rendered output.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Returns the dependencies the unit was materialized against.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

impl Unit for StaticUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self) -> Result<String, UnitFailure> {
        if self.dependencies.is_empty() {
            Ok(self.body.clone())
        } else {
            Ok(format!("{} [{}]", self.body, self.dependencies.join(", ")))
        }
    }
}

impl fmt::Debug for dyn Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit").field("name", &self.name()).finish()
    }
}
