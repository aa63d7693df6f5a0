//! Lazy, coalescing load coordination.
//!
//! [`LoadCoordinator::load`] never blocks: it returns a [`LoadHandle`] on the
//! key's current state and spawns a background resolution only when the key
//! has none. Concurrent callers for the same key share one slot, so one
//! resolution (and one manifest fetch) serves all of them.
//!
//! Each slot is published through a [`tokio::sync::watch`] channel. Dropping
//! a handle detaches that consumer only; the spawned resolution keeps running
//! and its result stays cached for the next consumer.
//!
//! Terminal states are never overwritten. [`LoadCoordinator::retry`] replaces
//! a `Failed` slot with a fresh one under the next epoch; handles on the old
//! slot keep observing the old failure.

mod state;

pub use state::{LoadKey, LoadState};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::boundary::panic_message;
use crate::resolver::{LoadError, ModuleResolver};

/// One resolution attempt for one key.
#[derive(Debug)]
struct LoadSlot {
    epoch: u64,
    state: watch::Sender<LoadState>,
}

impl LoadSlot {
    fn new(epoch: u64) -> Self {
        let (state, _) = watch::channel(LoadState::Pending);
        Self { epoch, state }
    }

    /// Publishes `outcome` if the slot is still pending.
    ///
    /// Returns false when the slot was already terminal.
    fn complete(&self, outcome: LoadState) -> bool {
        self.state.send_if_modified(move |current| {
            if current.is_terminal() {
                false
            } else {
                *current = outcome;
                true
            }
        })
    }

    fn is_failed(&self) -> bool {
        matches!(*self.state.borrow(), LoadState::Failed(_))
    }

    fn handle(&self, key: LoadKey) -> LoadHandle {
        LoadHandle {
            key,
            epoch: self.epoch,
            receiver: self.state.subscribe(),
        }
    }
}

/// Fails the slot as interrupted if the resolution task is dropped early.
struct CompletionGuard {
    key: LoadKey,
    slot: Arc<LoadSlot>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let interrupted = LoadError::interrupted(
            &self.key.remote_id,
            &self.key.unit_path,
            "resolution task dropped before completing",
        );
        if self.slot.complete(LoadState::Failed(interrupted)) {
            warn!(key = %self.key, "Load interrupted");
        }
    }
}

/// Consumer view of one load.
#[derive(Debug)]
pub struct LoadHandle {
    key: LoadKey,
    epoch: u64,
    receiver: watch::Receiver<LoadState>,
}

impl LoadHandle {
    /// Returns the key this handle observes.
    #[must_use]
    pub fn key(&self) -> &LoadKey {
        &self.key
    }

    /// Returns the retry epoch of the observed slot.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns the current state without waiting.
    #[must_use]
    pub fn state(&self) -> LoadState {
        self.receiver.borrow().clone()
    }

    /// Waits until the load is `Ready` or `Failed`.
    pub async fn wait(&mut self) -> LoadState {
        match self.receiver.wait_for(LoadState::is_terminal).await {
            Ok(state) => (*state).clone(),
            Err(_) => LoadState::Failed(LoadError::interrupted(
                &self.key.remote_id,
                &self.key.unit_path,
                "load slot closed before completing",
            )),
        }
    }
}

/// Coalescing cache of load states keyed by remote and unit path.
#[derive(Debug)]
pub struct LoadCoordinator {
    resolver: Arc<ModuleResolver>,
    slots: DashMap<LoadKey, Arc<LoadSlot>>,
}

impl LoadCoordinator {
    /// Creates a coordinator resolving through `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<ModuleResolver>) -> Self {
        Self {
            resolver,
            slots: DashMap::new(),
        }
    }

    /// Returns the resolver loads run through.
    #[must_use]
    pub fn resolver(&self) -> &Arc<ModuleResolver> {
        &self.resolver
    }

    /// Returns a handle on the load of `unit_path` from `remote_id`.
    ///
    /// Spawns a resolution if the key has never been requested; otherwise
    /// joins the existing slot, pending or terminal. Must be called from
    /// within a Tokio runtime.
    pub fn load(&self, remote_id: &str, unit_path: &str) -> LoadHandle {
        let key = LoadKey::new(remote_id, unit_path);
        let (slot, fresh) = match self.slots.entry(key.clone()) {
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            Entry::Vacant(vacant) => {
                let slot = Arc::new(LoadSlot::new(0));
                vacant.insert(Arc::clone(&slot));
                (slot, true)
            }
        };

        if fresh {
            self.spawn_resolution(key.clone(), Arc::clone(&slot));
        } else {
            debug!(key = %key, epoch = slot.epoch, "Joined existing load");
        }
        slot.handle(key)
    }

    /// Returns the current state of a key, or `None` if it was never loaded.
    #[must_use]
    pub fn state(&self, remote_id: &str, unit_path: &str) -> Option<LoadState> {
        let key = LoadKey::new(remote_id, unit_path);
        self.slots
            .get(&key)
            .map(|slot| slot.value().state.borrow().clone())
    }

    /// Starts a fresh load of a key whose current state is `Failed`.
    ///
    /// A pending or ready key is left alone and its current handle returned;
    /// a never-loaded key behaves like [`load`](Self::load).
    pub fn retry(&self, remote_id: &str, unit_path: &str) -> LoadHandle {
        let key = LoadKey::new(remote_id, unit_path);
        let (slot, fresh) = match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_failed() {
                    let slot = Arc::new(LoadSlot::new(occupied.get().epoch + 1));
                    occupied.insert(Arc::clone(&slot));
                    (slot, true)
                } else {
                    (Arc::clone(occupied.get()), false)
                }
            }
            Entry::Vacant(vacant) => {
                let slot = Arc::new(LoadSlot::new(0));
                vacant.insert(Arc::clone(&slot));
                (slot, true)
            }
        };

        if fresh {
            info!(key = %key, epoch = slot.epoch, "Retrying load");
            self.spawn_resolution(key.clone(), Arc::clone(&slot));
        }
        slot.handle(key)
    }

    /// Returns the number of keys ever requested.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing has been requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn spawn_resolution(&self, key: LoadKey, slot: Arc<LoadSlot>) {
        let resolver = Arc::clone(&self.resolver);
        let span = info_span!("load", key = %key, epoch = slot.epoch);
        let guard = CompletionGuard { key, slot };

        tokio::spawn(
            async move {
                let key = &guard.key;
                let outcome = AssertUnwindSafe(resolver.resolve(&key.remote_id, &key.unit_path))
                    .catch_unwind()
                    .await;
                let state = match outcome {
                    Ok(Ok(unit)) => {
                        debug!("Load ready");
                        LoadState::Ready(unit)
                    }
                    Ok(Err(error)) => {
                        warn!(kind = ?error.kind(), error = %error, "Load failed");
                        LoadState::Failed(error)
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        warn!(panic = %message, "Resolution panicked");
                        LoadState::Failed(LoadError::interrupted(
                            &key.remote_id,
                            &key.unit_path,
                            &message,
                        ))
                    }
                };
                guard.slot.complete(state);
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ledger::{ResolvedDependency, SharedLedger};
    use crate::remote::{
        InMemoryRemoteLoader, ManifestDocument, RemoteDirectory, RemoteEntry, UnitCatalog,
    };
    use crate::resolver::ErrorKind;
    use crate::unit::{UnitFailure, UnitRef};

    const URL: &str = "http://localhost:3001/remoteEntry.json";

    fn coordinator(loader: Arc<InMemoryRemoteLoader>) -> LoadCoordinator {
        let mut remotes = RemoteDirectory::new();
        remotes.insert(RemoteEntry::parse("app1", &format!("app1@{URL}")).unwrap());
        let resolver = ModuleResolver::new(
            remotes,
            loader,
            Arc::new(SharedLedger::new()),
            Duration::from_secs(5),
        );
        LoadCoordinator::new(Arc::new(resolver))
    }

    fn serving_loader() -> InMemoryRemoteLoader {
        let mut catalog = UnitCatalog::new();
        catalog.register_static("app1/App", "Dashboard");
        InMemoryRemoteLoader::new(catalog)
            .with_manifest(URL, ManifestDocument::new("app1").expose("./App", "app1/App"))
            .with_latency(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_load_returns_pending_immediately() {
        let coordinator = coordinator(Arc::new(serving_loader()));
        let handle = coordinator.load("app1", "./App");
        assert!(matches!(handle.state(), LoadState::Pending));
        assert_eq!(handle.epoch(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_loads_coalesce_into_one_fetch() {
        let loader = Arc::new(serving_loader());
        let coordinator = coordinator(Arc::clone(&loader));

        let mut first = coordinator.load("app1", "./App");
        let mut second = coordinator.load("app1", "App");
        let (a, b) = tokio::join!(first.wait(), second.wait());

        assert_eq!(loader.fetch_count(), 1);
        assert_eq!(coordinator.len(), 1);
        assert!(Arc::ptr_eq(a.unit().unwrap(), b.unit().unwrap()));
    }

    #[tokio::test]
    async fn test_terminal_state_never_transitions() {
        let coordinator = coordinator(Arc::new(serving_loader()));
        let mut handle = coordinator.load("app1", "./App");
        assert!(matches!(handle.wait().await, LoadState::Ready(_)));

        let key = LoadKey::new("app1", "./App");
        let slot = Arc::clone(coordinator.slots.get(&key).unwrap().value());
        let overwritten = slot.complete(LoadState::Failed(LoadError::interrupted(
            "app1", "./App", "late",
        )));
        assert!(!overwritten);
        assert!(matches!(
            coordinator.state("app1", "./App"),
            Some(LoadState::Ready(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_load_is_data_not_panic() {
        let loader = InMemoryRemoteLoader::new(UnitCatalog::new()).with_status(URL, 500);
        let coordinator = coordinator(Arc::new(loader));
        let state = coordinator.load("app1", "./App").wait().await;
        assert_eq!(state.error().unwrap().kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_retry_uses_fresh_epoch_only_after_failure() {
        let loader = Arc::new(InMemoryRemoteLoader::new(UnitCatalog::new()).with_status(URL, 503));
        let coordinator = coordinator(Arc::clone(&loader));

        let mut first = coordinator.load("app1", "./App");
        assert!(first.wait().await.error().is_some());

        let mut retried = coordinator.retry("app1", "./App");
        assert_eq!(retried.epoch(), 1);
        assert!(retried.wait().await.error().is_some());
        assert_eq!(loader.fetch_count(), 2);

        // The old handle still sees its own terminal failure.
        assert!(first.state().error().is_some());
        assert_eq!(first.epoch(), 0);
    }

    #[tokio::test]
    async fn test_retry_of_ready_key_is_noop() {
        let loader = Arc::new(serving_loader());
        let coordinator = coordinator(Arc::clone(&loader));
        coordinator.load("app1", "./App").wait().await;

        let handle = coordinator.retry("app1", "./App");
        assert_eq!(handle.epoch(), 0);
        assert!(matches!(handle.state(), LoadState::Ready(_)));
        assert_eq!(loader.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_still_populates_cache() {
        let loader = Arc::new(serving_loader());
        let coordinator = coordinator(Arc::clone(&loader));
        drop(coordinator.load("app1", "./App"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            coordinator.state("app1", "./App"),
            Some(LoadState::Ready(_))
        ));

        let handle = coordinator.load("app1", "./App");
        assert!(matches!(handle.state(), LoadState::Ready(_)));
        assert_eq!(loader.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_materialization_becomes_interrupted() {
        let mut catalog = UnitCatalog::new();
        catalog.register(
            "app1/App",
            |_: &[ResolvedDependency]| -> Result<UnitRef, UnitFailure> {
                panic!("factory exploded")
            },
        );
        let loader = InMemoryRemoteLoader::new(catalog)
            .with_manifest(URL, ManifestDocument::new("app1").expose("./App", "app1/App"));
        let coordinator = coordinator(Arc::new(loader));

        let state = coordinator.load("app1", "./App").wait().await;
        let error = state.error().unwrap();
        assert_eq!(error.kind(), ErrorKind::Interrupted);
        assert!(error.to_string().contains("factory exploded"));
    }

    #[tokio::test]
    async fn test_never_loaded_key_has_no_state() {
        let coordinator = coordinator(Arc::new(serving_loader()));
        assert!(coordinator.state("app1", "./App").is_none());
        assert!(coordinator.is_empty());
    }
}
