//! One worker version: precaching, generation pruning and fetch handling.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mylore_core::{CacheDb, Error, WorkerVersion};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use url::Url;

use crate::fetch::{FetchRequest, Fetcher, WorkerResponse, resolve};
use crate::router::{Route, Router};
use crate::strategy::StrategyEngine;

/// Lifecycle state of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting to activate.
    Installed,
    Activating,
    Activated,
    /// Failed to install or superseded by a newer version.
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker version bound to the cache store and the network.
pub struct ServiceWorker {
    id: u64,
    version: WorkerVersion,
    origin: Url,
    router: Router,
    engine: StrategyEngine,
    db: CacheDb,
    fetcher: Arc<dyn Fetcher>,
    state: watch::Sender<WorkerState>,
    skip_waiting: AtomicBool,
}

impl ServiceWorker {
    pub(crate) fn new(
        id: u64, version: WorkerVersion, origin: Url, backend_hosts: Vec<String>, db: CacheDb,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let router = Router::new(&origin, version.manifest.clone(), backend_hosts);
        let engine = StrategyEngine::new(db.clone(), Arc::clone(&fetcher));
        let (state, _) = watch::channel(WorkerState::Parsed);
        Self { id, version, origin, router, engine, db, fetcher, state, skip_waiting: AtomicBool::new(false) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> &WorkerVersion {
        &self.version
    }

    pub fn tag(&self) -> &str {
        &self.version.tag
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watch state transitions of this version.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        tracing::info!(version = %self.version.tag, id = self.id, from = %previous, to = %state, "worker state changed");
    }

    pub(crate) fn request_skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub(crate) fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Fetch every manifest asset and store them in the critical generation.
    ///
    /// All assets are fetched before anything is written, so a single
    /// unreachable or non-200 asset aborts without touching the store.
    pub(crate) async fn precache(&self) -> Result<usize, Error> {
        let critical = &self.version.critical;
        let mut fetched = Vec::with_capacity(self.version.manifest.len());

        for path in self.version.manifest.iter() {
            let url = resolve(&self.origin, path).map_err(|e| Error::InstallFailed(format!("{path}: {e}")))?;
            let request = FetchRequest::get(url);
            let response = self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|e| Error::InstallFailed(format!("{path}: {e}")))?;
            if !response.is_cacheable() {
                return Err(Error::InstallFailed(format!("{path}: status {}", response.status.as_u16())));
            }
            fetched.push(response.to_cached(&request));
        }

        self.db.open_generation(critical).await?;
        for entry in &fetched {
            self.db
                .put_entry(critical, entry)
                .await
                .map_err(|e| Error::InstallFailed(format!("{}: {e}", entry.url)))?;
        }

        tracing::info!(version = %self.version.tag, generation = %critical, assets = fetched.len(), "precached manifest");
        Ok(fetched.len())
    }

    /// Delete every generation this version does not own.
    ///
    /// Returns the names of the deleted generations.
    pub(crate) async fn prune_generations(&self) -> Result<Vec<String>, Error> {
        let mut removed = Vec::new();
        for name in self.db.generation_names().await? {
            if self.version.owns_generation(&name) {
                continue;
            }
            if self.db.delete_generation(&name).await? {
                tracing::info!(version = %self.version.tag, generation = %name, "deleted stale generation");
                removed.push(name);
            }
        }
        Ok(removed)
    }

    /// Answer an intercepted request, or None to let it pass through.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Option<WorkerResponse> {
        let route = self.router.classify(&request.method, &request.url);
        let generation = match route {
            Route::PassThrough => return None,
            Route::CacheFirst => &self.version.critical,
            Route::NetworkFirst | Route::StaleWhileRevalidate => &self.version.dynamic,
        };
        tracing::trace!(url = %request.url, route = route.as_str(), generation = %generation, "intercepted fetch");
        self.engine.resolve(route, request, generation).await
    }

    /// Stop cache writes and wait for in-flight revalidations.
    ///
    /// The version keeps answering requests but no longer touches the store,
    /// so its generations can be deleted without being recreated.
    pub(crate) async fn retire(&self) {
        self.engine.close();
        self.engine.settle().await;
    }

    /// Wait for background revalidations started by this version.
    pub async fn settle(&self) {
        self.engine.settle().await;
    }
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("tag", &self.version.tag)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ResponseSource;
    use crate::fetch::stub::StubFetcher;
    use mylore_core::AssetManifest;
    use reqwest::Method;

    fn version(tag: &str, paths: &[&str]) -> WorkerVersion {
        WorkerVersion {
            tag: tag.to_string(),
            critical: format!("{tag}-critical"),
            dynamic: format!("{tag}-dynamic"),
            manifest: AssetManifest::new(paths.iter().copied()),
        }
    }

    async fn worker(version: WorkerVersion) -> (ServiceWorker, Arc<StubFetcher>, CacheDb) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let fetcher = StubFetcher::new();
        let origin = Url::parse("https://lore.example").unwrap();
        let worker = ServiceWorker::new(1, version, origin, vec!["firestore".into()], db.clone(), fetcher.clone());
        (worker, fetcher, db)
    }

    #[tokio::test]
    async fn test_precache_stores_manifest() {
        let (worker, fetcher, db) = worker(version("v1", &["/app/", "/app/index.html"])).await;
        fetcher.respond("https://lore.example/app/", 200, "root");
        fetcher.respond("https://lore.example/app/index.html", 200, "index");

        assert_eq!(worker.precache().await.unwrap(), 2);
        assert_eq!(db.entry_keys("v1-critical").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_precache_aborts_on_single_failure() {
        let (worker, fetcher, db) = worker(version("v1", &["/app/", "/app/index.html"])).await;
        fetcher.respond("https://lore.example/app/", 200, "root");
        fetcher.respond("https://lore.example/app/index.html", 404, "missing");

        let result = worker.precache().await;
        assert!(matches!(result, Err(Error::InstallFailed(msg)) if msg.contains("/app/index.html")));
        assert!(!db.has_generation("v1-critical").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_keeps_owned_generations() {
        let (worker, _fetcher, db) = worker(version("v2", &[])).await;
        for name in ["v1-critical", "v1-dynamic", "v2-critical", "v2-dynamic", "v2"] {
            db.open_generation(name).await.unwrap();
        }

        let removed = worker.prune_generations().await.unwrap();
        assert_eq!(removed, vec!["v1-critical", "v1-dynamic"]);
        assert_eq!(db.generation_names().await.unwrap(), vec!["v2-critical", "v2-dynamic", "v2"]);
    }

    #[tokio::test]
    async fn test_handle_fetch_routes_to_generations() {
        let (worker, fetcher, db) = worker(version("v1", &["/app/index.html"])).await;
        fetcher.respond("https://lore.example/app/index.html", 200, "index");
        fetcher.respond("https://cdn.example/lib.js", 200, "lib");

        let index = FetchRequest::parse(Method::GET, "https://lore.example/app/index.html").unwrap();
        let lib = FetchRequest::parse(Method::GET, "https://cdn.example/lib.js").unwrap();
        worker.handle_fetch(&index).await.unwrap();
        worker.handle_fetch(&lib).await.unwrap();

        assert!(db.match_entry("v1-critical", &index.cache_key()).await.unwrap().is_some());
        assert!(db.match_entry("v1-dynamic", &lib.cache_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_handle_fetch_pass_through() {
        let (worker, fetcher, _db) = worker(version("v1", &[])).await;
        let post = FetchRequest::parse(Method::POST, "https://lore.example/api").unwrap();
        let backend = FetchRequest::parse(Method::GET, "https://firestore.googleapis.com/v1/x").unwrap();

        assert!(worker.handle_fetch(&post).await.is_none());
        assert!(worker.handle_fetch(&backend).await.is_none());
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_offline_request_served_from_precache() {
        let (worker, fetcher, _db) = worker(version("v1", &["/app/", "/app/index.html"])).await;
        fetcher.respond("https://lore.example/app/", 200, "root");
        fetcher.respond("https://lore.example/app/index.html", 200, "<html>index</html>");
        worker.precache().await.unwrap();

        fetcher.fail("https://lore.example/app/index.html");
        let request = FetchRequest::parse(Method::GET, "https://lore.example/app/index.html").unwrap();
        let response = worker.handle_fetch(&request).await.unwrap();
        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(&response.body[..], b"<html>index</html>");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(WorkerState::Installed.to_string(), "installed");
        assert_eq!(serde_json::to_string(&WorkerState::Activating).unwrap(), r#""activating""#);
    }
}
