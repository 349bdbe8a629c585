//! Scripted fetcher for tests.

use super::{FetchRequest, FetchResponse, Fetcher};
use bytes::Bytes;
use mylore_core::Error;
use reqwest::{StatusCode, header};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone)]
enum Reply {
    Status(StatusCode, Bytes),
    Fail,
}

/// Fetcher answering from a URL → reply table.
///
/// Unknown URLs fail like an unreachable network. When a gate is set,
/// every fetch waits for `release()` before answering.
#[derive(Default)]
pub(crate) struct StubFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl StubFetcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, url: &str, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).expect("valid status");
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), Reply::Status(status, Bytes::from(body.to_string())));
    }

    pub(crate) fn fail(&self, url: &str) {
        self.replies.lock().unwrap().insert(url.to_string(), Reply::Fail);
    }

    /// Answer `url` only after `delay`.
    pub(crate) fn delay(&self, url: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
    }

    /// Hold every subsequent fetch until `release` is called.
    pub(crate) fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let url = request.url.as_str().to_string();
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(url.clone()).or_default() += 1;

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let delay = self.delays.lock().unwrap().get(&url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().unwrap().get(&url).cloned();
        match reply {
            Some(Reply::Status(status, bytes)) => {
                let mut headers = header::HeaderMap::new();
                headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/plain"));
                Ok(FetchResponse { url: request.url.clone(), status, headers, bytes, fetch_ms: 0 })
            }
            Some(Reply::Fail) | None => Err(Error::HttpError(format!("network error for {url}: unreachable"))),
        }
    }
}
