//! Worker lifecycle: install, activate and control hand-off.
//!
//! ### Slots
//! - At most one version is pending (installing or installed and waiting).
//!   Registering another version replaces it and marks the old one redundant.
//! - At most one version is active. Activation prunes every generation the
//!   new version does not own and claims every connected client.
//!
//! ### Events
//! Version discovery, state changes and controller changes are broadcast as
//! [`LifecycleEvent`]s. Pages subscribe through [`LifecycleController::connect_client`].

pub mod message;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mylore_core::{AppConfig, CacheDb, Error, WorkerVersion};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use url::Url;

use crate::fetch::{FetchRequest, Fetcher, WorkerResponse};

pub use message::{ControlMessage, ControlReply};
pub use worker::{ServiceWorker, WorkerState};

const EVENT_CAPACITY: usize = 64;

/// Identity of a connected page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A new version was registered and starts installing.
    UpdateFound { worker: u64, tag: String },
    StateChanged { worker: u64, tag: String, state: WorkerState },
    /// `client` is now controlled by `worker`.
    ControllerChanged { client: ClientId, worker: u64, tag: String },
}

/// Where new worker versions come from.
#[async_trait::async_trait]
pub trait VersionSource: Send + Sync {
    /// The version currently published.
    async fn latest(&self) -> Result<WorkerVersion, Error>;
}

/// A connected page: its id, current controller and event feed.
pub struct ClientSession {
    pub id: ClientId,
    pub controller: Option<u64>,
    pub events: broadcast::Receiver<LifecycleEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct WorkerStatus {
    pub id: u64,
    pub tag: String,
    pub state: WorkerState,
}

impl From<&ServiceWorker> for WorkerStatus {
    fn from(worker: &ServiceWorker) -> Self {
        Self { id: worker.id(), tag: worker.tag().to_string(), state: worker.state() }
    }
}

/// Snapshot of both slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ControllerStatus {
    pub active: Option<WorkerStatus>,
    pub pending: Option<WorkerStatus>,
    pub clients: usize,
}

/// Owns the pending and active worker slots.
pub struct LifecycleController {
    db: CacheDb,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    backend_hosts: Vec<String>,
    source: Arc<dyn VersionSource>,
    auto_skip_waiting: bool,
    active: RwLock<Option<Arc<ServiceWorker>>>,
    pending: RwLock<Option<Arc<ServiceWorker>>>,
    /// Serialises activation so two callers cannot both promote a version.
    transition: Mutex<()>,
    clients: Mutex<HashMap<ClientId, Option<u64>>>,
    next_worker: AtomicU64,
    next_client: AtomicU64,
    events: broadcast::Sender<LifecycleEvent>,
    /// Dynamic generation of the active version.
    dynamic: watch::Sender<Option<String>>,
}

impl LifecycleController {
    pub fn new(
        db: CacheDb, fetcher: Arc<dyn Fetcher>, config: &AppConfig, source: Arc<dyn VersionSource>,
    ) -> Result<Self, Error> {
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (dynamic, _) = watch::channel(None);
        Ok(Self {
            db,
            fetcher,
            origin,
            backend_hosts: config.backend_hosts.clone(),
            source,
            auto_skip_waiting: config.auto_skip_waiting,
            active: RwLock::new(None),
            pending: RwLock::new(None),
            transition: Mutex::new(()),
            clients: Mutex::new(HashMap::new()),
            next_worker: AtomicU64::new(1),
            next_client: AtomicU64::new(1),
            events,
            dynamic,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Follow the dynamic generation of whichever version is active.
    pub fn watch_dynamic(&self) -> watch::Receiver<Option<String>> {
        self.dynamic.subscribe()
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, worker: &ServiceWorker, state: WorkerState) {
        worker.set_state(state);
        self.emit(LifecycleEvent::StateChanged { worker: worker.id(), tag: worker.tag().to_string(), state });
    }

    /// Place `version` in the pending slot and install it.
    ///
    /// On install failure the version becomes redundant, the slot is cleared
    /// and the active version keeps control.
    pub async fn register(&self, version: WorkerVersion) -> Result<Arc<ServiceWorker>, Error> {
        let id = self.next_worker.fetch_add(1, Ordering::SeqCst);
        let worker = Arc::new(ServiceWorker::new(
            id,
            version,
            self.origin.clone(),
            self.backend_hosts.clone(),
            self.db.clone(),
            Arc::clone(&self.fetcher),
        ));

        let replaced = self.pending.write().await.replace(Arc::clone(&worker));
        if let Some(previous) = replaced {
            tracing::info!(version = %previous.tag(), "pending version superseded");
            self.set_state(&previous, WorkerState::Redundant);
        }

        tracing::info!(version = %worker.tag(), id, "registering worker version");
        self.emit(LifecycleEvent::UpdateFound { worker: id, tag: worker.tag().to_string() });
        self.set_state(&worker, WorkerState::Installing);

        if let Err(e) = worker.precache().await {
            tracing::error!(version = %worker.tag(), error = %e, "install failed, keeping current version");
            self.set_state(&worker, WorkerState::Redundant);
            self.release_pending(&worker).await;
            return Err(e);
        }

        if worker.state() == WorkerState::Redundant {
            return Err(Error::InvalidState(format!("{} was superseded during install", worker.tag())));
        }
        self.set_state(&worker, WorkerState::Installed);

        if self.auto_skip_waiting || worker.skip_waiting_requested() {
            let _guard = self.transition.lock().await;
            self.activate_locked(&worker).await;
        }

        Ok(worker)
    }

    async fn release_pending(&self, worker: &Arc<ServiceWorker>) {
        let mut pending = self.pending.write().await;
        if pending.as_ref().is_some_and(|p| Arc::ptr_eq(p, worker)) {
            *pending = None;
        }
    }

    /// Activate the pending version without waiting for clients to close.
    ///
    /// A version still installing activates as soon as its install succeeds.
    pub async fn skip_waiting(&self) -> Result<(), Error> {
        let Some(worker) = self.pending_version().await else {
            return Err(Error::InvalidState("no version is waiting".to_string()));
        };
        worker.request_skip_waiting();

        match worker.state() {
            WorkerState::Installed => {
                let _guard = self.transition.lock().await;
                self.activate_locked(&worker).await;
                Ok(())
            }
            WorkerState::Redundant => Err(Error::InvalidState(format!("{} is redundant", worker.tag()))),
            _ => Ok(()),
        }
    }

    /// Promote `worker` to active. Caller holds the transition lock.
    async fn activate_locked(&self, worker: &Arc<ServiceWorker>) {
        {
            let mut pending = self.pending.write().await;
            let is_pending = pending.as_ref().is_some_and(|p| Arc::ptr_eq(p, worker));
            if !is_pending || worker.state() != WorkerState::Installed {
                return;
            }
            *pending = None;
        }

        self.set_state(worker, WorkerState::Activating);

        // The outgoing version must stop writing before its generations go.
        let previous = self.active_version().await;
        if let Some(previous) = &previous {
            previous.retire().await;
        }

        match worker.prune_generations().await {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!(version = %worker.tag(), removed = removed.len(), "pruned stale generations");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(version = %worker.tag(), error = %e, "failed to prune generations"),
        }

        *self.active.write().await = Some(Arc::clone(worker));
        self.dynamic.send_replace(Some(worker.version().dynamic.clone()));
        if let Some(previous) = previous {
            self.set_state(&previous, WorkerState::Redundant);
        }

        self.set_state(worker, WorkerState::Activated);
        self.claim(worker).await;
    }

    /// Take control of every connected client.
    async fn claim(&self, worker: &ServiceWorker) {
        let mut clients = self.clients.lock().await;
        for (client, controller) in clients.iter_mut() {
            if *controller == Some(worker.id()) {
                continue;
            }
            *controller = Some(worker.id());
            self.emit(LifecycleEvent::ControllerChanged {
                client: *client,
                worker: worker.id(),
                tag: worker.tag().to_string(),
            });
        }
        tracing::debug!(version = %worker.tag(), clients = clients.len(), "claimed clients");
    }

    /// Connect a page. The session sees every event emitted afterwards.
    pub async fn connect_client(&self) -> ClientSession {
        let events = self.events.subscribe();
        let id = ClientId(self.next_client.fetch_add(1, Ordering::SeqCst));
        let mut clients = self.clients.lock().await;
        let controller = self.active.read().await.as_ref().map(|w| w.id());
        clients.insert(id, controller);
        ClientSession { id, controller, events }
    }

    pub async fn disconnect_client(&self, client: ClientId) {
        self.clients.lock().await.remove(&client);
    }

    pub async fn pending_version(&self) -> Option<Arc<ServiceWorker>> {
        self.pending.read().await.clone()
    }

    /// Empty the pending slot; the removed version becomes redundant.
    pub async fn clear_pending_version(&self) -> Option<Arc<ServiceWorker>> {
        let removed = self.pending.write().await.take();
        if let Some(worker) = &removed {
            self.set_state(worker, WorkerState::Redundant);
        }
        removed
    }

    /// Drop both slots. Requests pass through until a version registers again.
    ///
    /// Returns how many versions were removed.
    pub async fn unregister(&self) -> usize {
        let _guard = self.transition.lock().await;
        let pending = self.pending.write().await.take();
        let active = self.active.write().await.take();
        self.dynamic.send_replace(None);

        let mut removed = 0;
        for worker in pending.into_iter().chain(active) {
            worker.retire().await;
            self.set_state(&worker, WorkerState::Redundant);
            removed += 1;
        }
        for controller in self.clients.lock().await.values_mut() {
            *controller = None;
        }

        tracing::info!(removed, "unregistered worker versions");
        removed
    }

    pub async fn active_version(&self) -> Option<Arc<ServiceWorker>> {
        self.active.read().await.clone()
    }

    /// Answer an intercepted request through the active version.
    ///
    /// None means the request goes to the network untouched.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Option<WorkerResponse> {
        let worker = self.active_version().await?;
        worker.handle_fetch(request).await
    }

    /// Handle a control-channel message. Only queries and clears reply.
    pub async fn post_message(&self, message: ControlMessage) -> Option<ControlReply> {
        match message {
            ControlMessage::SkipWaiting => {
                if let Err(e) = self.skip_waiting().await {
                    tracing::warn!(error = %e, "skip waiting ignored");
                }
                None
            }
            ControlMessage::ClearCache => match self.db.clear().await {
                Ok(removed) => {
                    tracing::info!(generations = removed, "cleared cache");
                    Some(ControlReply::Cleared { success: true })
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to clear cache");
                    Some(ControlReply::Cleared { success: false })
                }
            },
            ControlMessage::GetCacheSize => match self.db.total_size().await {
                Ok(size) => Some(ControlReply::CacheSize { size }),
                Err(e) => {
                    tracing::error!(error = %e, "failed to compute cache size");
                    None
                }
            },
        }
    }

    /// Re-check the version source and register the latest version if new.
    ///
    /// Returns the registered version, or None when nothing changed.
    pub async fn update(&self) -> Result<Option<Arc<ServiceWorker>>, Error> {
        let latest = self.source.latest().await?;
        let known = |slot: &Option<Arc<ServiceWorker>>| slot.as_ref().is_some_and(|w| w.tag() == latest.tag);
        if known(&*self.active.read().await) || known(&*self.pending.read().await) {
            tracing::debug!(version = %latest.tag, "no update available");
            return Ok(None);
        }
        self.register(latest).await.map(Some)
    }

    pub async fn status(&self) -> ControllerStatus {
        let active = self.active.read().await.as_deref().map(WorkerStatus::from);
        let pending = self.pending.read().await.as_deref().map(WorkerStatus::from);
        let clients = self.clients.lock().await.len();
        ControllerStatus { active, pending, clients }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use mylore_core::AssetManifest;

    /// Version source returning whatever was last published.
    pub(crate) struct PublishedVersion(std::sync::Mutex<WorkerVersion>);

    impl PublishedVersion {
        pub(crate) fn new(version: WorkerVersion) -> Arc<Self> {
            Arc::new(Self(std::sync::Mutex::new(version)))
        }

        pub(crate) fn publish(&self, version: WorkerVersion) {
            *self.0.lock().unwrap() = version;
        }
    }

    #[async_trait::async_trait]
    impl VersionSource for PublishedVersion {
        async fn latest(&self) -> Result<WorkerVersion, Error> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    pub(crate) const ORIGIN: &str = "https://lore.example";

    pub(crate) fn version(tag: &str) -> WorkerVersion {
        WorkerVersion {
            tag: tag.to_string(),
            critical: format!("{tag}-critical"),
            dynamic: format!("{tag}-dynamic"),
            manifest: AssetManifest::new(["/app/", "/app/index.html"]),
        }
    }

    pub(crate) fn config(auto_skip_waiting: bool) -> AppConfig {
        AppConfig { origin: ORIGIN.to_string(), auto_skip_waiting, ..Default::default() }
    }
}
