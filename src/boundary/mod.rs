//! Fault isolation around unit execution.
//!
//! A [`FaultBoundary`] wraps the code it directly executes. An `Err` or a
//! panic inside [`FaultBoundary::run`] trips the boundary and comes back as
//! [`Guarded::Fallback`] instead of unwinding into the caller. A tripped
//! boundary stays tripped and short-circuits later runs; a new boundary
//! starts [`BoundaryState::Clear`].
//!
//! Failures that happen while loading, before a unit reaches the boundary,
//! are not seen here: they arrive as `LoadState::Failed` from the coordinator
//! and are rendered by the shell as a separate fallback.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;
use tracing::warn;

use crate::unit::{UnitFailure, UnitRef};

/// Why a boundary tripped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unit '{unit}' failed during execution: {message}")]
pub struct BoundaryTrip {
    /// Name of the unit that was executing.
    pub unit: String,
    /// Failure or panic message.
    pub message: String,
    /// True when the failure was a panic rather than a returned error.
    pub panicked: bool,
}

/// State of one boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BoundaryState {
    /// Nothing has failed.
    #[default]
    Clear,
    /// A failure was caught; terminal for this boundary.
    Tripped(BoundaryTrip),
}

/// Result of running code inside a boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    /// The code completed.
    Completed(T),
    /// The code failed, or the boundary was already tripped.
    Fallback(BoundaryTrip),
}

impl<T> Guarded<T> {
    /// Returns true for `Fallback`.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    /// Converts into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the trip for `Fallback`.
    pub fn into_result(self) -> Result<T, BoundaryTrip> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Fallback(trip) => Err(trip),
        }
    }
}

/// Scoped execution wrapper with `Clear | Tripped` state.
#[derive(Debug, Default)]
pub struct FaultBoundary {
    state: BoundaryState,
}

impl FaultBoundary {
    /// Creates a clear boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on behalf of `unit`, converting failures into a fallback.
    ///
    /// When already tripped, `f` is not run and the original trip is returned.
    pub fn run<T, F>(&mut self, unit: &str, f: F) -> Guarded<T>
    where
        F: FnOnce() -> Result<T, UnitFailure>,
    {
        if let BoundaryState::Tripped(trip) = &self.state {
            return Guarded::Fallback(trip.clone());
        }

        let trip = match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => return Guarded::Completed(value),
            Ok(Err(failure)) => BoundaryTrip {
                unit: unit.to_string(),
                message: failure.message,
                panicked: false,
            },
            Err(payload) => BoundaryTrip {
                unit: unit.to_string(),
                message: panic_message(payload.as_ref()),
                panicked: true,
            },
        };

        warn!(
            unit,
            panicked = trip.panicked,
            message = %trip.message,
            "Fault boundary tripped"
        );
        self.state = BoundaryState::Tripped(trip.clone());
        Guarded::Fallback(trip)
    }

    /// Renders `unit` inside the boundary.
    pub fn render(&mut self, unit: &UnitRef) -> Guarded<String> {
        self.run(unit.name(), || unit.render())
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &BoundaryState {
        &self.state
    }

    /// Returns true once a failure has been caught.
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        matches!(self.state, BoundaryState::Tripped(_))
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
