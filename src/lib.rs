//! Federator Core Library
//!
//! This library composes a single running shell out of independently built
//! and independently deployed remote modules, loaded on demand at runtime
//! rather than linked at build time.
//!
//! # Architecture
//!
//! The library is organized into the following modules, leaves first:
//! - [`remote`] - Remote entries, manifest fetching, and the pluggable loader seam
//! - [`unit`] - The contract every consumed unit exposes to the composition layer
//! - [`ledger`] - Process-wide shared dependency ledger with singleton enforcement
//! - [`resolver`] - Resolves one exposed unit of one remote, reconciling shared deps
//! - [`coordinator`] - Coalescing, non-blocking load cache keyed by remote and unit path
//! - [`boundary`] - Fault isolation around unit execution
//! - [`shell`] - Composition runtime tying the pieces together into mounts and views
//!
//! # Example
//!
//! ```no_run
//! use federator_core::{HttpRemoteLoader, RemoteDirectory, RemoteEntry, Shell, UnitCatalog};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut remotes = RemoteDirectory::new();
//! remotes.insert(RemoteEntry::parse(
//!     "remoteApp1",
//!     "remoteApp1@http://localhost:3001/remoteEntry.json",
//! )?);
//!
//! let loader = HttpRemoteLoader::new(UnitCatalog::new())?;
//! let shell = Shell::builder("host")
//!     .remotes(remotes)
//!     .loader(loader)
//!     .build()?;
//!
//! let mut mount = shell.mount("remoteApp1", "./App");
//! println!("{}", mount.settle().await);
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod boundary;
pub mod coordinator;
pub mod ledger;
pub mod remote;
pub mod resolver;
pub mod shell;
pub mod unit;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use boundary::{BoundaryState, BoundaryTrip, FaultBoundary, Guarded};
pub use coordinator::{LoadCoordinator, LoadHandle, LoadKey, LoadState};
pub use ledger::{
    InstanceRef, LedgerEntry, LedgerError, ResolvedDependency, SharedDependencySpec,
    SharedInstance, SharedLedger, SharingScope, VersionRange,
};
pub use remote::{
    ClientSetupError, FetchError, HttpManifestFetcher, HttpRemoteLoader, InMemoryRemoteLoader,
    ManifestDocument, NetworkFailure, RemoteDescriptor, RemoteDirectory, RemoteEntry,
    RemoteEntryError, RemoteLoader, UnitCatalog, normalize_unit_path,
};
pub use resolver::{ErrorKind, LoadError, ModuleResolver};
pub use shell::{Mount, SHELL_REQUESTER, Shell, ShellBuilder, ShellError, View};
pub use unit::{StaticUnit, Unit, UnitFailure, UnitRef};
