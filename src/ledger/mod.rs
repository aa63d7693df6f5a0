//! Process-wide shared dependency ledger.
//!
//! The shell and every remote declare the shared dependencies they expect
//! (`react ^18.2.0 singleton`, ...). The [`SharedLedger`] reconciles those
//! declarations so that a singleton dependency resolves to exactly one
//! version and one instance for the lifetime of the process.
//!
//! # Reconciliation rule
//!
//! - The first registration for a name fixes its resolved version.
//! - A later requester is compatible when the resolved version satisfies the
//!   requester's declared [`VersionRange`]; it then shares the same instance.
//! - If the entry, any requester bound to it, or the new requester is a
//!   singleton and the range does not match, registration fails with
//!   [`LedgerError::VersionConflict`]. The resolved version is never replaced.
//! - Two non-singleton declarations that do not match coexist: the requester
//!   receives a private instance of its own declared version, and gets the
//!   same instance back when it registers again.
//! - A singleton requester is refused while private instances of the name
//!   are in use, since two versions would then be live.
//!
//! # Lifecycle
//!
//! A ledger is an ordinary value: `new → register* → lookup* → drop`. The
//! composition runtime creates one at shell startup and passes it to the
//! resolver explicitly, so tests can build independent ledgers per case.

mod error;
mod range;

pub use error::LedgerError;
pub use range::VersionRange;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use semver::Version;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// A shared dependency as declared by the shell or a remote.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "SharedDependencyWire")]
pub struct SharedDependencySpec {
    /// Dependency name (e.g. `react`).
    pub name: String,
    /// The version this declarer ships.
    pub version: Version,
    /// Whether exactly one instance must exist across shell and remotes.
    pub singleton: bool,
    /// Versions this declarer can run against.
    pub required_range: VersionRange,
}

impl SharedDependencySpec {
    /// Creates a spec from string parts.
    ///
    /// When `required_range` is `None` the range defaults to `^version`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidVersion`] or [`LedgerError::InvalidRange`]
    /// when either string does not parse.
    pub fn new(
        name: &str,
        version: &str,
        singleton: bool,
        required_range: Option<&str>,
    ) -> Result<Self, LedgerError> {
        let parsed = Version::parse(version.trim())
            .map_err(|error| LedgerError::invalid_version(name, version, &error.to_string()))?;
        let required_range = match required_range {
            Some(range) => VersionRange::parse(range)?,
            None => VersionRange::caret(&parsed),
        };
        Ok(Self {
            name: name.to_string(),
            version: parsed,
            singleton,
            required_range,
        })
    }

    /// Creates a singleton spec with the default caret range.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidVersion`] when `version` does not parse.
    pub fn singleton(name: &str, version: &str) -> Result<Self, LedgerError> {
        Self::new(name, version, true, None)
    }
}

/// Wire shape of a shared dependency declaration in manifests and config files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharedDependencyWire {
    name: String,
    version: String,
    #[serde(default)]
    singleton: bool,
    #[serde(default, alias = "required_version")]
    required_version: Option<String>,
}

impl TryFrom<SharedDependencyWire> for SharedDependencySpec {
    type Error = LedgerError;

    fn try_from(wire: SharedDependencyWire) -> Result<Self, Self::Error> {
        Self::new(
            &wire.name,
            &wire.version,
            wire.singleton,
            wire.required_version.as_deref(),
        )
    }
}

/// The concrete instance a dependency resolved to.
///
/// Stands in for the loaded library itself; identity is what matters, so
/// consumers of a singleton receive pointer-equal [`InstanceRef`]s.
#[derive(Debug, PartialEq, Eq)]
pub struct SharedInstance {
    /// Dependency name.
    pub name: String,
    /// Version of this instance.
    pub version: Version,
    /// Requester whose declaration supplied this instance.
    pub provider: String,
}

/// Shared handle to a resolved dependency instance.
pub type InstanceRef = Arc<SharedInstance>;

/// Whether a requester shares the ledger's instance or holds its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingScope {
    /// Bound to the ledger entry's instance.
    Shared,
    /// Private copy of a non-singleton dependency.
    Private,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    /// Dependency name.
    pub name: String,
    /// Version the requester will run against.
    pub version: Version,
    /// Instance the requester will run against.
    pub instance: InstanceRef,
    /// Whether the instance is the shared one.
    pub scope: SharingScope,
}

impl ResolvedDependency {
    /// Formats as `name@version`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// One entry per shared dependency name.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Dependency name.
    pub name: String,
    /// The single version in force for this name.
    pub resolved_version: Version,
    /// The shared instance.
    pub instance: InstanceRef,
    /// Whether the first registrant declared a singleton. Never changes.
    pub singleton: bool,
    /// Requesters bound to the shared instance.
    pub required_by: BTreeSet<String>,
    /// Bound requesters that declared the dependency a singleton.
    pub singleton_requesters: BTreeSet<String>,
    /// Private instances handed to non-singleton requesters whose range did not match.
    pub private_instances: BTreeMap<String, InstanceRef>,
}

impl LedgerEntry {
    fn new(requester: &str, spec: &SharedDependencySpec) -> Self {
        Self {
            name: spec.name.clone(),
            resolved_version: spec.version.clone(),
            instance: Arc::new(SharedInstance {
                name: spec.name.clone(),
                version: spec.version.clone(),
                provider: requester.to_string(),
            }),
            singleton: spec.singleton,
            required_by: BTreeSet::from([requester.to_string()]),
            singleton_requesters: if spec.singleton {
                BTreeSet::from([requester.to_string()])
            } else {
                BTreeSet::new()
            },
            private_instances: BTreeMap::new(),
        }
    }

    /// Returns true when any bound requester relies on a single instance.
    #[must_use]
    pub fn enforces_singleton(&self) -> bool {
        self.singleton || !self.singleton_requesters.is_empty()
    }

    fn conflict(&self, requester: &str, spec: &SharedDependencySpec) -> LedgerError {
        LedgerError::VersionConflict {
            name: self.name.clone(),
            resolved_version: self.resolved_version.clone(),
            rejected_version: spec.version.clone(),
            required_range: spec.required_range.to_string(),
            requester: requester.to_string(),
            requesters: self.required_by.iter().cloned().collect(),
        }
    }

    // A singleton cannot be granted while other versions are already running privately.
    fn private_conflict(
        &self,
        requester: &str,
        spec: &SharedDependencySpec,
    ) -> Option<LedgerError> {
        let (_, first) = self.private_instances.iter().next()?;
        Some(LedgerError::VersionConflict {
            name: self.name.clone(),
            resolved_version: first.version.clone(),
            rejected_version: spec.version.clone(),
            required_range: spec.required_range.to_string(),
            requester: requester.to_string(),
            requesters: self.private_instances.keys().cloned().collect(),
        })
    }

    fn shared(&self) -> ResolvedDependency {
        ResolvedDependency {
            name: self.name.clone(),
            version: self.resolved_version.clone(),
            instance: Arc::clone(&self.instance),
            scope: SharingScope::Shared,
        }
    }
}

type Entries = BTreeMap<String, LedgerEntry>;

/// Registry of shared dependency name to resolved version and instance.
///
/// `register` is the only write path. Each registration runs its
/// check-then-write under one lock, so two requesters racing for the same
/// name observe a single ordering.
#[derive(Debug, Default)]
pub struct SharedLedger {
    entries: Mutex<Entries>,
}

impl SharedLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one shared dependency for `requester`.
    ///
    /// Re-registering an identical declaration by the same requester is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::VersionConflict`] when a singleton is already
    /// resolved to a version outside the requester's range, or when a
    /// singleton is requested while private instances exist.
    #[tracing::instrument(skip(self, spec), fields(name = %spec.name, version = %spec.version))]
    pub fn register(
        &self,
        requester: &str,
        spec: &SharedDependencySpec,
    ) -> Result<ResolvedDependency, LedgerError> {
        let mut entries = self.lock();
        apply(&mut entries, requester, spec)
    }

    /// Registers every spec for `requester`, or none of them.
    ///
    /// All specs are reconciled against a working copy; the ledger is only
    /// updated when every one succeeds.
    ///
    /// # Errors
    ///
    /// Returns the first [`LedgerError`] encountered; the ledger is unchanged.
    #[tracing::instrument(skip(self, specs), fields(count = specs.len()))]
    pub fn register_all(
        &self,
        requester: &str,
        specs: &[SharedDependencySpec],
    ) -> Result<Vec<ResolvedDependency>, LedgerError> {
        let mut entries = self.lock();
        let mut working = entries.clone();
        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            resolved.push(apply(&mut working, requester, spec)?);
        }
        *entries = working;
        Ok(resolved)
    }

    /// Returns the shared instance for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotRegistered`] if nothing registered `name`.
    pub fn lookup(&self, name: &str) -> Result<InstanceRef, LedgerError> {
        self.lock()
            .get(name)
            .map(|entry| Arc::clone(&entry.instance))
            .ok_or_else(|| LedgerError::not_registered(name))
    }

    /// Returns a snapshot of the entry for `name`.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<LedgerEntry> {
        self.lock().get(name).cloned()
    }

    /// Returns a snapshot of all entries, ordered by name.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().values().cloned().collect()
    }

    /// Returns the number of registered names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // No code path panics while holding the lock, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn apply(
    entries: &mut Entries,
    requester: &str,
    spec: &SharedDependencySpec,
) -> Result<ResolvedDependency, LedgerError> {
    let Some(entry) = entries.get_mut(&spec.name) else {
        let entry = LedgerEntry::new(requester, spec);
        info!(
            name = %spec.name,
            version = %spec.version,
            singleton = spec.singleton,
            requester,
            "Registered shared dependency"
        );
        let resolved = entry.shared();
        entries.insert(spec.name.clone(), entry);
        return Ok(resolved);
    };

    if let Some(instance) = entry.private_instances.get(requester)
        && instance.version == spec.version
    {
        debug!(name = %spec.name, requester, "Reusing private instance");
        return Ok(ResolvedDependency {
            name: spec.name.clone(),
            version: instance.version.clone(),
            instance: Arc::clone(instance),
            scope: SharingScope::Private,
        });
    }

    if spec.required_range.matches(&entry.resolved_version) {
        if spec.singleton
            && !entry.singleton_requesters.contains(requester)
            && let Some(error) = entry.private_conflict(requester, spec)
        {
            warn!(
                name = %entry.name,
                requester,
                holders = ?entry.private_instances.keys().collect::<Vec<_>>(),
                "Singleton requested while private instances are in use"
            );
            return Err(error);
        }
        if entry.required_by.insert(requester.to_string()) {
            debug!(
                name = %entry.name,
                resolved = %entry.resolved_version,
                requester,
                "Bound requester to shared dependency"
            );
        }
        if spec.singleton {
            entry.singleton_requesters.insert(requester.to_string());
        }
        return Ok(entry.shared());
    }

    if entry.enforces_singleton() || spec.singleton {
        warn!(
            name = %entry.name,
            resolved = %entry.resolved_version,
            rejected = %spec.version,
            range = %spec.required_range,
            requester,
            "Singleton version conflict"
        );
        return Err(entry.conflict(requester, spec));
    }

    let instance = entry
        .private_instances
        .entry(requester.to_string())
        .or_insert_with(|| {
            Arc::new(SharedInstance {
                name: spec.name.clone(),
                version: spec.version.clone(),
                provider: requester.to_string(),
            })
        });
    debug!(
        name = %spec.name,
        version = %instance.version,
        requester,
        "Issued private instance for non-singleton dependency"
    );
    Ok(ResolvedDependency {
        name: spec.name.clone(),
        version: instance.version.clone(),
        instance: Arc::clone(instance),
        scope: SharingScope::Private,
    })
}
