//! Composition runtime.
//!
//! A [`Shell`] owns the process-wide [`SharedLedger`] and the
//! [`LoadCoordinator`]. Building it registers the shell's own shared
//! dependencies under [`SHELL_REQUESTER`] before any remote is loaded.
//!
//! [`Shell::mount`] is what a presentation layer calls per mount point. Each
//! [`Mount`] holds one load handle and one [`FaultBoundary`], and turns the
//! two into a [`View`]: loading, rendered, or one of two distinct fallbacks
//! (load failure vs. failure while rendering).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::boundary::{BoundaryTrip, FaultBoundary, Guarded};
use crate::coordinator::{LoadCoordinator, LoadHandle, LoadKey, LoadState};
use crate::ledger::{LedgerError, SharedDependencySpec, SharedLedger};
use crate::remote::{DEFAULT_FETCH_TIMEOUT, RemoteDirectory, RemoteLoader};
use crate::resolver::{LoadError, ModuleResolver};

/// Requester id the shell registers its own shared dependencies under.
pub const SHELL_REQUESTER: &str = "shell";

/// Errors that can occur while building a shell.
#[derive(Debug, Error)]
pub enum ShellError {
    /// No loader was supplied
    #[error(
        "no remote loader configured\n  Suggestion: Pass an HttpRemoteLoader or InMemoryRemoteLoader to ShellBuilder::loader"
    )]
    MissingLoader,

    /// The shell's own shared dependency declarations are inconsistent
    #[error("shell shared dependencies rejected: {0}")]
    SharedDependency(#[from] LedgerError),
}

/// Builder for [`Shell`].
pub struct ShellBuilder {
    name: String,
    remotes: RemoteDirectory,
    shared: Vec<SharedDependencySpec>,
    loader: Option<Arc<dyn RemoteLoader>>,
    fetch_timeout: Duration,
}

impl ShellBuilder {
    /// Sets the remote directory.
    #[must_use]
    pub fn remotes(mut self, remotes: RemoteDirectory) -> Self {
        self.remotes = remotes;
        self
    }

    /// Sets the shell's own shared dependency declarations.
    #[must_use]
    pub fn shared(mut self, shared: Vec<SharedDependencySpec>) -> Self {
        self.shared = shared;
        self
    }

    /// Sets the loader.
    #[must_use]
    pub fn loader(self, loader: impl RemoteLoader + 'static) -> Self {
        self.shared_loader(Arc::new(loader))
    }

    /// Sets a loader the caller keeps a handle to.
    #[must_use]
    pub fn shared_loader(mut self, loader: Arc<dyn RemoteLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Sets the manifest fetch timeout.
    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Creates the ledger, registers the shell's shared dependencies, and
    /// wires the resolver and coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::MissingLoader`] without a loader and
    /// [`ShellError::SharedDependency`] if the shell's declarations conflict
    /// with each other.
    pub fn build(self) -> Result<Shell, ShellError> {
        let loader = self.loader.ok_or(ShellError::MissingLoader)?;

        let ledger = Arc::new(SharedLedger::new());
        ledger.register_all(SHELL_REQUESTER, &self.shared)?;

        let resolver = ModuleResolver::new(
            self.remotes,
            Arc::clone(&loader),
            Arc::clone(&ledger),
            self.fetch_timeout,
        );
        info!(
            shell = %self.name,
            loader = loader.name(),
            remotes = resolver.remotes().len(),
            shared = ledger.len(),
            "Shell ready"
        );

        Ok(Shell {
            name: self.name,
            ledger,
            coordinator: Arc::new(LoadCoordinator::new(Arc::new(resolver))),
        })
    }
}

impl fmt::Debug for ShellBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellBuilder")
            .field("name", &self.name)
            .field("remotes", &self.remotes.ids())
            .field("shared", &self.shared.len())
            .field("loader", &self.loader.as_ref().map(|loader| loader.name()))
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

/// The composing application.
#[derive(Debug, Clone)]
pub struct Shell {
    name: String,
    ledger: Arc<SharedLedger>,
    coordinator: Arc<LoadCoordinator>,
}

impl Shell {
    /// Starts building a shell called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ShellBuilder {
        ShellBuilder {
            name: name.into(),
            remotes: RemoteDirectory::new(),
            shared: Vec::new(),
            loader: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Returns the shell name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the shared dependency ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<SharedLedger> {
        &self.ledger
    }

    /// Returns the load coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<LoadCoordinator> {
        &self.coordinator
    }

    /// Returns the configured remotes.
    #[must_use]
    pub fn remotes(&self) -> &RemoteDirectory {
        self.coordinator.resolver().remotes()
    }

    /// Mounts `unit_path` from `remote_id`, starting its load if needed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(&self, remote_id: &str, unit_path: &str) -> Mount {
        let handle = self.coordinator.load(remote_id, unit_path);
        debug!(key = %handle.key(), "Mounted unit");
        Mount::new(handle)
    }

    /// Mounts `unit_path` again after retrying a failed load.
    pub fn remount(&self, remote_id: &str, unit_path: &str) -> Mount {
        Mount::new(self.coordinator.retry(remote_id, unit_path))
    }
}

/// One mount point of one unit.
#[derive(Debug)]
pub struct Mount {
    handle: LoadHandle,
    boundary: FaultBoundary,
}

impl Mount {
    fn new(handle: LoadHandle) -> Self {
        Self {
            handle,
            boundary: FaultBoundary::new(),
        }
    }

    /// Returns the mounted key.
    #[must_use]
    pub fn key(&self) -> &LoadKey {
        self.handle.key()
    }

    /// Returns the mount's boundary.
    #[must_use]
    pub fn boundary(&self) -> &FaultBoundary {
        &self.boundary
    }

    /// Returns the current view without waiting for the load.
    pub fn view(&mut self) -> View {
        let state = self.handle.state();
        self.present(state)
    }

    /// Waits for the load to settle, then returns the view.
    pub async fn settle(&mut self) -> View {
        let state = self.handle.wait().await;
        self.present(state)
    }

    fn present(&mut self, state: LoadState) -> View {
        let key = self.handle.key().clone();
        match state {
            LoadState::Pending => View::Loading { key },
            LoadState::Failed(error) => View::LoadFailed { key, error },
            LoadState::Ready(unit) => match self.boundary.render(&unit) {
                Guarded::Completed(output) => View::Rendered { key, output },
                Guarded::Fallback(trip) => View::Tripped { key, trip },
            },
        }
    }
}

/// What a mount shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    /// The load is still pending.
    Loading {
        /// Mounted key.
        key: LoadKey,
    },
    /// The unit rendered.
    Rendered {
        /// Mounted key.
        key: LoadKey,
        /// Render output.
        output: String,
    },
    /// Loading failed before the unit reached the boundary.
    LoadFailed {
        /// Mounted key.
        key: LoadKey,
        /// Why loading failed.
        error: LoadError,
    },
    /// The unit failed while rendering and the boundary caught it.
    Tripped {
        /// Mounted key.
        key: LoadKey,
        /// What the boundary caught.
        trip: BoundaryTrip,
    },
}

impl View {
    /// Returns the mounted key.
    #[must_use]
    pub fn key(&self) -> &LoadKey {
        match self {
            Self::Loading { key }
            | Self::Rendered { key, .. }
            | Self::LoadFailed { key, .. }
            | Self::Tripped { key, .. } => key,
        }
    }

    /// Returns true for either fallback.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::LoadFailed { .. } | Self::Tripped { .. })
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading { key } => write!(f, "{key}: loading"),
            Self::Rendered { key, output } => write!(f, "{key}: rendered {output}"),
            Self::LoadFailed { key, error } => {
                let summary = error.to_string();
                let summary = summary.lines().next().unwrap_or_default();
                write!(f, "{key}: failed to load ({:?}): {summary}", error.kind())
            }
            Self::Tripped { key, trip } => write!(f, "{key}: crashed while rendering: {trip}"),
        }
    }
}
