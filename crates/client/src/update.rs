//! Page-side update hand-off.
//!
//! The coordinator watches lifecycle events for its page, prompts once when
//! a new version is waiting, and after the user confirms drives
//! skip-waiting through to a single reload.

use std::sync::Arc;
use std::time::Duration;

use mylore_core::Error;
use tokio::sync::{broadcast, watch};

use crate::lifecycle::{ClientId, ControlMessage, ControlReply, LifecycleController, LifecycleEvent, WorkerState};

/// The page the coordinator acts on.
pub trait Page: Send + Sync {
    /// Show a non-blocking "update available" prompt.
    fn show_update_prompt(&self, tag: &str);
    /// Full page reload.
    fn reload(&self);
}

/// Reload guard. Moves forward only, so a page reloads at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    Idle,
    /// The user confirmed; waiting for the controller to change.
    ReloadPending,
    Reloaded,
}

pub struct UpdateCoordinator {
    controller: Arc<LifecycleController>,
    page: Arc<dyn Page>,
    client: ClientId,
    current: Option<u64>,
    events: broadcast::Receiver<LifecycleEvent>,
    state: ReloadState,
    prompted: Option<u64>,
}

impl UpdateCoordinator {
    /// Connect `page` as a client of `controller`.
    pub async fn connect(controller: Arc<LifecycleController>, page: Arc<dyn Page>) -> Self {
        let session = controller.connect_client().await;
        Self {
            controller,
            page,
            client: session.id,
            current: session.controller,
            events: session.events,
            state: ReloadState::Idle,
            prompted: None,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn state(&self) -> ReloadState {
        self.state
    }

    /// Id of the worker controlling this page.
    pub fn controller_id(&self) -> Option<u64> {
        self.current
    }

    /// The user accepted the update: tell the waiting version to activate.
    pub async fn confirm_update(&mut self) -> Result<(), Error> {
        let previous = self.state;
        if previous == ReloadState::Idle {
            self.state = ReloadState::ReloadPending;
        }
        if let Err(e) = self.controller.skip_waiting().await {
            self.state = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Clear every generation, unregister all versions and reload.
    ///
    /// The reload happens even if clearing failed. Returns whether the cache
    /// was cleared.
    pub async fn force_refresh(&mut self) -> bool {
        let cleared = matches!(
            self.controller.post_message(ControlMessage::ClearCache).await,
            Some(ControlReply::Cleared { success: true })
        );
        let removed = self.controller.unregister().await;
        self.current = None;
        self.state = ReloadState::Reloaded;

        tracing::info!(client = self.client.0, cleared, unregistered = removed, "forced refresh, reloading");
        self.page.reload();
        cleared
    }

    pub async fn handle_event(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::StateChanged { worker, tag, state: WorkerState::Installed } => {
                self.maybe_prompt(worker, &tag).await;
            }
            LifecycleEvent::ControllerChanged { client, worker, tag } if client == self.client => {
                let previous = self.current.replace(worker);
                self.on_controller_change(previous, &tag);
            }
            _ => {}
        }
    }

    async fn maybe_prompt(&mut self, worker: u64, tag: &str) {
        if self.current.is_none() || self.prompted == Some(worker) {
            return;
        }
        let waiting = self.controller.pending_version().await;
        if !waiting.is_some_and(|w| w.id() == worker && w.state() == WorkerState::Installed) {
            return;
        }
        self.prompted = Some(worker);
        tracing::info!(client = self.client.0, version = tag, "update available");
        self.page.show_update_prompt(tag);
    }

    fn on_controller_change(&mut self, previous: Option<u64>, tag: &str) {
        match (self.state, previous) {
            (ReloadState::Reloaded, _) => {
                tracing::debug!(client = self.client.0, version = tag, "controller changed after reload, ignored");
            }
            (ReloadState::Idle, None) => {
                tracing::debug!(client = self.client.0, version = tag, "page claimed for the first time");
            }
            (ReloadState::ReloadPending, _) | (ReloadState::Idle, Some(_)) => {
                self.state = ReloadState::Reloaded;
                tracing::info!(client = self.client.0, version = tag, "controller changed, reloading");
                self.page.reload();
            }
        }
    }

    /// Handle every event already queued. Returns how many were handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.handle_event(event).await;
                    handled += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(client = self.client.0, skipped, "lifecycle events dropped");
                }
                Err(_) => return handled,
            }
        }
    }

    /// Follow lifecycle events and poll for updates every `interval` until
    /// `shutdown` flips to true.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(client = self.client.0, skipped, "lifecycle events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = poll.tick() => {
                    if let Err(e) = self.controller.update().await {
                        tracing::warn!(error = %e, "update check failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.controller.disconnect_client(self.client).await;
    }
}
