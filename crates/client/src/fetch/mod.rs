//! Network boundary for the worker.
//!
//! ### Requests and responses
//! - `FetchRequest` is an intercepted request with a canonical URL.
//! - `FetchResponse` is what the network returned, whatever its status.
//! - `WorkerResponse` is what the worker hands back to the page, tagged with
//!   where it came from (cache, network or the offline placeholder).
//!
//! ### Fetchers
//! - `Fetcher` is the seam strategies and install precaching fetch through.
//! - `HttpFetcher` is the reqwest implementation. Every fetch is bounded by
//!   the configured timeout so a hung request cannot stall a strategy.
//! - Transport failures are `Err`; HTTP error statuses are `Ok` responses.

#[cfg(test)]
pub(crate) mod stub;
pub mod url;

use bytes::Bytes;
use mylore_core::{AppConfig, CachedResponse, Error};
use reqwest::{Client, Url, header};
use std::time::{Duration, Instant};

pub use reqwest::{Method, StatusCode};
pub use url::{UrlError, canonicalize, resolve};

/// Body of the placeholder returned when neither network nor cache can answer.
pub const OFFLINE_BODY: &str = "Offline";

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: header::HeaderMap,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: header::HeaderMap::new() }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse and canonicalize `url` into a request.
    pub fn parse(method: Method, url: &str) -> Result<Self, Error> {
        let url = canonicalize(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self::new(method, url))
    }

    /// Cache key: hash of method and canonical URL.
    pub fn cache_key(&self) -> String {
        mylore_core::cache::hash::compute_cache_key(self.method.as_str(), self.url.as_str())
    }
}

/// Response from the network.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The URL requested
    pub url: Url,
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: header::HeaderMap,
    /// Response body bytes
    pub bytes: Bytes,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

impl FetchResponse {
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Snapshot for the cache store under `request`'s identity.
    pub fn to_cached(&self, request: &FetchRequest) -> CachedResponse {
        CachedResponse::new(
            request.method.as_str(),
            request.url.as_str(),
            self.status.as_u16(),
            header_pairs(&self.headers),
            self.bytes.to_vec(),
        )
    }
}

/// Where a worker response was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Cache,
    Network,
    Offline,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::Offline => "offline",
        }
    }
}

/// Response handed back to the page.
#[derive(Debug, Clone)]
pub struct WorkerResponse {
    pub status: StatusCode,
    pub headers: header::HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl WorkerResponse {
    /// The 503 placeholder served when nothing else is available.
    pub fn offline() -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/plain"));
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers,
            body: Bytes::from_static(OFFLINE_BODY.as_bytes()),
            source: ResponseSource::Offline,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

impl From<FetchResponse> for WorkerResponse {
    fn from(response: FetchResponse) -> Self {
        Self { status: response.status, headers: response.headers, body: response.bytes, source: ResponseSource::Network }
    }
}

impl From<CachedResponse> for WorkerResponse {
    fn from(cached: CachedResponse) -> Self {
        let mut headers = header::HeaderMap::new();
        for (name, value) in &cached.headers {
            if let (Ok(name), Ok(value)) =
                (header::HeaderName::from_bytes(name.as_bytes()), header::HeaderValue::from_str(value))
            {
                headers.append(name, value);
            }
        }
        Self {
            status: StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK),
            headers,
            body: Bytes::from(cached.body),
            source: ResponseSource::Cache,
        }
    }
}

fn header_pairs(headers: &header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

/// Network access used by strategies and install precaching.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `request` from the network.
    ///
    /// Returns `Err` only for transport failures; any HTTP status is `Ok`.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error>;
}

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "mylore-worker/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 10MB)
    pub max_bytes: usize,

    /// Upper bound for one fetch (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "mylore-worker/0.1".to_string(),
            max_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_body_bytes,
            timeout: config.timeout(),
            ..Default::default()
        }
    }
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    http: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

fn transport_error(url: &Url, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::FetchTimeout(format!("{url}: {err}"))
    } else {
        Error::HttpError(format!("network error for {url}: {err}"))
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let start = Instant::now();

        let response = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| transport_error(&request.url, e))?;

        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(|e| transport_error(&request.url, e))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", bytes.len(), self.config.max_bytes)));
        }

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            url = %request.url,
            status = status.as_u16(),
            bytes = bytes.len(),
            fetch_ms,
            "fetched from network"
        );

        Ok(FetchResponse { url: request.url.clone(), status, headers, bytes, fetch_ms })
    }
}
