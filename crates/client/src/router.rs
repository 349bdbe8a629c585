//! Request classification.
//!
//! Decides, from method, origin and path alone, which strategy answers an
//! intercepted request. Rules are checked in priority order:
//!
//! 1. Non-GET requests and requests to the document-store backend pass through.
//! 2. Same-origin paths listed in the asset manifest are cache-first (critical generation).
//! 3. Cross-origin requests are network-first (dynamic generation).
//! 4. Everything else is stale-while-revalidate (dynamic generation).

use mylore_core::AssetManifest;
use reqwest::Method;
use url::{Origin, Url};

/// Outcome of classifying a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    PassThrough,
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::PassThrough => "pass_through",
            Route::CacheFirst => "cache_first",
            Route::NetworkFirst => "network_first",
            Route::StaleWhileRevalidate => "stale_while_revalidate",
        }
    }
}

/// Pure request classifier for one worker version.
#[derive(Debug, Clone)]
pub struct Router {
    origin: Origin,
    manifest: AssetManifest,
    backend_hosts: Vec<String>,
}

impl Router {
    pub fn new(origin: &Url, manifest: AssetManifest, backend_hosts: Vec<String>) -> Self {
        let backend_hosts = backend_hosts
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { origin: origin.origin(), manifest, backend_hosts }
    }

    /// Whether `url` belongs to the remote document store.
    pub fn is_backend(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.backend_hosts.iter().any(|pattern| host.contains(pattern.as_str()))
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin
    }

    pub fn classify(&self, method: &Method, url: &Url) -> Route {
        if *method != Method::GET || self.is_backend(url) {
            return Route::PassThrough;
        }

        let same_origin = self.is_same_origin(url);

        if same_origin && self.manifest.contains(url.path()) {
            return Route::CacheFirst;
        }

        if !same_origin {
            return Route::NetworkFirst;
        }

        Route::StaleWhileRevalidate
    }
}
