//! Request-handling policies built on the cache store.
//!
//! None of the policies return an error: transport failures degrade to a
//! stored entry or to the 503 offline placeholder, and cache write failures
//! are logged while the network response is still returned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mylore_core::{CacheDb, CachedResponse, Error};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::fetch::{FetchRequest, FetchResponse, Fetcher, WorkerResponse};
use crate::router::Route;

/// Executes cache-first, network-first and stale-while-revalidate against
/// a generation of the cache store.
#[derive(Clone)]
pub struct StrategyEngine {
    db: CacheDb,
    fetcher: Arc<dyn Fetcher>,
    revalidations: Arc<Mutex<JoinSet<()>>>,
    /// Set once the owning version is retired; reads still work, writes stop.
    closed: Arc<AtomicBool>,
}

impl StrategyEngine {
    pub fn new(db: CacheDb, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            db,
            fetcher,
            revalidations: Arc::new(Mutex::new(JoinSet::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resolve `request` with the policy selected by `route`.
    ///
    /// Returns None for `Route::PassThrough`; the caller sends those to the
    /// network untouched.
    pub async fn resolve(&self, route: Route, request: &FetchRequest, generation: &str) -> Option<WorkerResponse> {
        match route {
            Route::PassThrough => None,
            Route::CacheFirst => Some(self.cache_first(request, generation).await),
            Route::NetworkFirst => Some(self.network_first(request, generation).await),
            Route::StaleWhileRevalidate => Some(self.stale_while_revalidate(request, generation).await),
        }
    }

    /// Serve the stored entry; only go to the network on a miss.
    pub async fn cache_first(&self, request: &FetchRequest, generation: &str) -> WorkerResponse {
        if let Some(cached) = lookup(&self.db, generation, request).await {
            tracing::debug!(url = %request.url, generation, "served from cache");
            return cached.into();
        }

        match fetch_and_store(&self.db, self.fetcher.as_ref(), &self.closed, request, generation).await {
            Ok(response) => response.into(),
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "fetch failed with no cached entry");
                WorkerResponse::offline()
            }
        }
    }

    /// Prefer the network; fall back to the stored entry when it fails.
    ///
    /// A non-200 answer is replaced by the stored entry when one exists and
    /// returned as-is otherwise, since the host did respond.
    pub async fn network_first(&self, request: &FetchRequest, generation: &str) -> WorkerResponse {
        match fetch_and_store(&self.db, self.fetcher.as_ref(), &self.closed, request, generation).await {
            Ok(response) if response.is_cacheable() => {
                tracing::debug!(url = %request.url, generation, "served from network and cached");
                response.into()
            }
            Ok(response) => match lookup(&self.db, generation, request).await {
                Some(cached) => {
                    tracing::debug!(
                        url = %request.url,
                        status = response.status.as_u16(),
                        "network returned an error status, serving cached copy"
                    );
                    cached.into()
                }
                None => response.into(),
            },
            Err(e) => {
                tracing::debug!(url = %request.url, error = %e, "network unavailable, trying cache");
                match lookup(&self.db, generation, request).await {
                    Some(cached) => cached.into(),
                    None => WorkerResponse::offline(),
                }
            }
        }
    }

    /// Serve the stored entry immediately and refresh it in the background.
    ///
    /// Without a stored entry the caller waits for the network.
    pub async fn stale_while_revalidate(&self, request: &FetchRequest, generation: &str) -> WorkerResponse {
        let Some(cached) = lookup(&self.db, generation, request).await else {
            return match fetch_and_store(&self.db, self.fetcher.as_ref(), &self.closed, request, generation).await {
                Ok(response) => response.into(),
                Err(e) => {
                    tracing::debug!(url = %request.url, error = %e, "revalidation failed with nothing cached");
                    WorkerResponse::offline()
                }
            };
        };

        let db = self.db.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let request = request.clone();
        let generation = generation.to_string();
        let closed = Arc::clone(&self.closed);

        let mut revalidations = self.revalidations.lock().await;
        while revalidations.try_join_next().is_some() {}
        revalidations.spawn(async move {
            if let Err(e) = fetch_and_store(&db, fetcher.as_ref(), &closed, &request, &generation).await {
                tracing::debug!(url = %request.url, error = %e, "background revalidation failed");
            }
        });

        cached.into()
    }

    /// Stop writing to the cache store. Requests are still answered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait for every background revalidation started so far.
    pub async fn settle(&self) {
        let mut pending = std::mem::take(&mut *self.revalidations.lock().await);
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "revalidation task aborted");
            }
        }
    }
}

/// Stored entry for `request`, treating store errors as a miss.
async fn lookup(db: &CacheDb, generation: &str, request: &FetchRequest) -> Option<CachedResponse> {
    match db.match_entry(generation, &request.cache_key()).await {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(url = %request.url, generation, error = %e, "cache lookup failed");
            None
        }
    }
}

/// Fetch from the network and store a 200 response.
///
/// A failed write is logged and the response is still returned. Nothing is
/// written once `closed` is set.
async fn fetch_and_store(
    db: &CacheDb, fetcher: &dyn Fetcher, closed: &AtomicBool, request: &FetchRequest, generation: &str,
) -> Result<FetchResponse, Error> {
    let response = fetcher.fetch(request).await?;
    if closed.load(Ordering::SeqCst) {
        tracing::debug!(url = %request.url, generation, "engine closed, response not stored");
        return Ok(response);
    }
    if response.is_cacheable()
        && let Err(e) = db.put_entry(generation, &response.to_cached(request)).await
    {
        tracing::warn!(url = %request.url, generation, error = %e, "failed to store response");
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ResponseSource;
    use crate::fetch::stub::StubFetcher;
    use reqwest::{Method, StatusCode};
    use std::time::Duration;

    const DYNAMIC: &str = "mylore-dynamic-v1";
    const CRITICAL: &str = "mylore-critical-v1";

    async fn engine() -> (StrategyEngine, Arc<StubFetcher>, CacheDb) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let fetcher = StubFetcher::new();
        (StrategyEngine::new(db.clone(), fetcher.clone()), fetcher, db)
    }

    fn get(url: &str) -> FetchRequest {
        FetchRequest::parse(Method::GET, url).unwrap()
    }

    async fn seed(db: &CacheDb, generation: &str, url: &str, body: &str) {
        let entry = CachedResponse::new("GET", url, 200, Vec::new(), body.as_bytes().to_vec());
        db.put_entry(generation, &entry).await.unwrap();
    }

    async fn stored_body(db: &CacheDb, generation: &str, url: &str) -> Option<Vec<u8>> {
        db.match_entry(generation, &get(url).cache_key())
            .await
            .unwrap()
            .map(|e| e.body)
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let (engine, fetcher, db) = engine().await;
        let url = "https://lore.example/app/index.html";
        seed(&db, CRITICAL, url, "<html>cached</html>").await;
        fetcher.respond(url, 200, "<html>new</html>");

        for _ in 0..3 {
            let response = engine.cache_first(&get(url), CRITICAL).await;
            assert_eq!(response.source, ResponseSource::Cache);
            assert_eq!(&response.body[..], b"<html>cached</html>");
        }
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let (engine, fetcher, db) = engine().await;
        let url = "https://lore.example/app/app.js";
        fetcher.respond(url, 200, "js");

        let response = engine.cache_first(&get(url), CRITICAL).await;
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(stored_body(&db, CRITICAL, url).await, Some(b"js".to_vec()));

        let again = engine.cache_first(&get(url), CRITICAL).await;
        assert_eq!(again.source, ResponseSource::Cache);
        assert_eq!(fetcher.calls(url), 1);
    }

    #[tokio::test]
    async fn test_cache_first_non_200_not_stored() {
        let (engine, fetcher, db) = engine().await;
        let url = "https://lore.example/app/missing.js";
        fetcher.respond(url, 404, "nope");

        let response = engine.cache_first(&get(url), CRITICAL).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(stored_body(&db, CRITICAL, url).await, None);
    }

    #[tokio::test]
    async fn test_cache_first_offline_placeholder() {
        let (engine, _fetcher, _db) = engine().await;
        let response = engine.cache_first(&get("https://lore.example/app/x.css"), CRITICAL).await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&response.body[..], b"Offline");
    }

    #[tokio::test]
    async fn test_network_first_overwrites_cached() {
        let (engine, fetcher, db) = engine().await;
        let url = "https://cdn.example/lib.js";
        seed(&db, DYNAMIC, url, "v1").await;
        fetcher.respond(url, 200, "v2");

        let response = engine.network_first(&get(url), DYNAMIC).await;
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(&response.body[..], b"v2");
        assert_eq!(stored_body(&db, DYNAMIC, url).await, Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let (engine, fetcher, db) = engine().await;
        let url = "https://cdn.example/lib.js";
        seed(&db, DYNAMIC, url, "v1").await;
        fetcher.fail(url);

        let response = engine.network_first(&get(url), DYNAMIC).await;
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(&response.body[..], b"v1");
    }

    #[tokio::test]
    async fn test_network_first_error_status_keeps_cached_entry() {
        let (engine, fetcher, db) = engine().await;
        let url = "https://cdn.example/lib.js";
        seed(&db, DYNAMIC, url, "v1").await;
        fetcher.respond(url, 500, "boom");

        let response = engine.network_first(&get(url), DYNAMIC).await;
        assert_eq!(&response.body[..], b"v1");
        assert_eq!(stored_body(&db, DYNAMIC, url).await, Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn test_network_first_error_status_without_cache() {
        let (engine, fetcher, _db) = engine().await;
        let url = "https://cdn.example/gone.js";
        fetcher.respond(url, 410, "gone");

        let response = engine.network_first(&get(url), DYNAMIC).await;
        assert_eq!(response.status, StatusCode::GONE);
        assert_eq!(response.source, ResponseSource::Network);
    }

    #[tokio::test]
    async fn test_network_first_offline() {
        let (engine, _fetcher, _db) = engine().await;
        let response = engine.network_first(&get("https://cdn.example/none.js"), DYNAMIC).await;
        assert_eq!(response.source, ResponseSource::Offline);
    }

    #[tokio::test]
    async fn test_swr_serves_stale_without_waiting() {
        let (engine, fetcher, db) = engine().await;
        let url = "https://lore.example/covers/1.png";
        seed(&db, DYNAMIC, url, "stale").await;
        fetcher.respond(url, 200, "fresh");
        fetcher.hold();

        let response = tokio::time::timeout(Duration::from_secs(5), engine.stale_while_revalidate(&get(url), DYNAMIC))
            .await
            .expect("stale entry must not wait for the network");
        assert_eq!(&response.body[..], b"stale");
        assert_eq!(response.source, ResponseSource::Cache);

        fetcher.release();
        engine.settle().await;

        assert_eq!(stored_body(&db, DYNAMIC, url).await, Some(b"fresh".to_vec()));
        let next = engine.stale_while_revalidate(&get(url), DYNAMIC).await;
        assert_eq!(&next.body[..], b"fresh");
    }

    #[tokio::test]
    async fn test_swr_miss_waits_for_network() {
        let (engine, fetcher, db) = engine().await;
        let url = "https://lore.example/novels.json";
        fetcher.respond(url, 200, "[]");

        let response = engine.stale_while_revalidate(&get(url), DYNAMIC).await;
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(stored_body(&db, DYNAMIC, url).await, Some(b"[]".to_vec()));
    }

    #[tokio::test]
    async fn test_swr_background_failure_absorbed() {
        let (engine, fetcher, db) = engine().await;
        let url = "https://lore.example/covers/2.png";
        seed(&db, DYNAMIC, url, "stale").await;
        fetcher.fail(url);

        let response = engine.stale_while_revalidate(&get(url), DYNAMIC).await;
        assert_eq!(&response.body[..], b"stale");
        engine.settle().await;
        assert_eq!(stored_body(&db, DYNAMIC, url).await, Some(b"stale".to_vec()));
    }

    #[tokio::test]
    async fn test_swr_miss_offline() {
        let (engine, _fetcher, _db) = engine().await;
        let response = engine.stale_while_revalidate(&get("https://lore.example/x"), DYNAMIC).await;
        assert_eq!(response.source, ResponseSource::Offline);
    }

    #[tokio::test]
    async fn test_closed_engine_serves_without_writing() {
        let (engine, fetcher, db) = engine().await;
        let cached = "https://lore.example/covers/3.png";
        let missing = "https://lore.example/app/new.js";
        seed(&db, DYNAMIC, cached, "stale").await;
        fetcher.respond(cached, 200, "fresh");
        fetcher.respond(missing, 200, "new");

        engine.close();
        assert!(engine.is_closed());

        let response = engine.stale_while_revalidate(&get(cached), DYNAMIC).await;
        assert_eq!(&response.body[..], b"stale");
        let response = engine.cache_first(&get(missing), CRITICAL).await;
        assert_eq!(&response.body[..], b"new");
        engine.settle().await;

        assert_eq!(stored_body(&db, DYNAMIC, cached).await, Some(b"stale".to_vec()));
        assert!(!db.has_generation(CRITICAL).await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_pass_through() {
        let (engine, fetcher, _db) = engine().await;
        let result = engine.resolve(Route::PassThrough, &get("https://lore.example/x"), DYNAMIC).await;
        assert!(result.is_none());
        assert_eq!(fetcher.total_calls(), 0);
    }
}
