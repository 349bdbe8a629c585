//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (MYLORE_*)
//! 2. TOML config file (if MYLORE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (MYLORE_*)
/// 2. TOML config file (if MYLORE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite cache database.
    ///
    /// Set via MYLORE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Origin the application is served from (scheme, host, port).
    ///
    /// Requests to any other origin are treated as third-party.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Version tag generation name. Changing it rolls out a new worker version.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Generation holding the precached asset manifest.
    #[serde(default = "default_critical_cache")]
    pub critical_cache: String,

    /// Generation holding runtime-cached responses.
    #[serde(default = "default_dynamic_cache")]
    pub dynamic_cache: String,

    /// Root-relative paths precached at install and served cache-first.
    #[serde(default = "default_critical_assets")]
    pub critical_assets: Vec<String>,

    /// Host substrings of the remote document store. Matching requests are never intercepted.
    #[serde(default = "default_backend_hosts")]
    pub backend_hosts: Vec<String>,

    /// User-Agent string for network fetches.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upper bound for a single network fetch, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum response body accepted from the network.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Activate a freshly installed version without waiting for confirmation.
    #[serde(default = "default_true")]
    pub auto_skip_waiting: bool,

    /// Soft budget for the sum of all cached bodies.
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    /// Number of dynamic entries evicted per budget run.
    #[serde(default = "default_eviction_batch")]
    pub eviction_batch: usize,

    /// Storage quota the usage estimate is compared against.
    #[serde(default = "default_storage_quota_bytes")]
    pub storage_quota_bytes: u64,

    /// Usage percentage above which old generations are dropped.
    #[serde(default = "default_quota_threshold_percent")]
    pub quota_threshold_percent: f64,

    /// Generations kept (most recently created) when the quota is exceeded.
    #[serde(default = "default_keep_generations")]
    pub keep_generations: usize,

    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    #[serde(default = "default_quota_interval_secs")]
    pub quota_interval_secs: u64,

    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./mylore-cache.sqlite")
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_cache_version() -> String {
    "mylore-v2".into()
}

fn default_critical_cache() -> String {
    "mylore-critical-v1".into()
}

fn default_dynamic_cache() -> String {
    "mylore-dynamic-v1".into()
}

fn default_critical_assets() -> Vec<String> {
    [
        "/MyLore/",
        "/MyLore/index.html",
        "/MyLore/styles.css",
        "/MyLore/app.js",
        "/MyLore/script.js",
        "/MyLore/manifest.json",
        "/MyLore/mylore.png",
        "/MyLore/firebase.js",
        "/MyLore/crud.js",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_backend_hosts() -> Vec<String> {
    vec!["firebase".into(), "firestore".into()]
}

fn default_user_agent() -> String {
    "mylore-worker/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_max_cache_bytes() -> u64 {
    50 * 1024 * 1024 // 50MB
}

fn default_eviction_batch() -> usize {
    10
}

fn default_storage_quota_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_quota_threshold_percent() -> f64 {
    80.0
}

fn default_keep_generations() -> usize {
    2
}

fn default_eviction_interval_secs() -> u64 {
    30 * 60
}

fn default_quota_interval_secs() -> u64 {
    10 * 60
}

fn default_update_interval_secs() -> u64 {
    5 * 60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            cache_version: default_cache_version(),
            critical_cache: default_critical_cache(),
            dynamic_cache: default_dynamic_cache(),
            critical_assets: default_critical_assets(),
            backend_hosts: default_backend_hosts(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            auto_skip_waiting: true,
            max_cache_bytes: default_max_cache_bytes(),
            eviction_batch: default_eviction_batch(),
            storage_quota_bytes: default_storage_quota_bytes(),
            quota_threshold_percent: default_quota_threshold_percent(),
            keep_generations: default_keep_generations(),
            eviction_interval_secs: default_eviction_interval_secs(),
            quota_interval_secs: default_quota_interval_secs(),
            update_interval_secs: default_update_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn quota_interval(&self) -> Duration {
        Duration::from_secs(self.quota_interval_secs)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Parsed application origin.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `origin` is not an absolute http(s) URL.
    pub fn origin_url(&self) -> Result<url::Url, ConfigError> {
        let parsed = url::Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })?;
        match parsed.scheme() {
            "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
            _ => Err(ConfigError::Invalid { field: "origin".into(), reason: "must be an http(s) origin".into() }),
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `MYLORE_`
    /// 2. TOML file from `MYLORE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("MYLORE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("MYLORE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./mylore-cache.sqlite"));
        assert_eq!(config.cache_version, "mylore-v2");
        assert_eq!(config.critical_cache, "mylore-critical-v1");
        assert_eq!(config.dynamic_cache, "mylore-dynamic-v1");
        assert_eq!(config.critical_assets.len(), 9);
        assert_eq!(config.critical_assets[0], "/MyLore/");
        assert_eq!(config.backend_hosts, vec!["firebase", "firestore"]);
        assert_eq!(config.max_cache_bytes, 50 * 1024 * 1024);
        assert_eq!(config.eviction_batch, 10);
        assert_eq!(config.keep_generations, 2);
        assert!(config.auto_skip_waiting);
    }

    #[test]
    fn test_intervals() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
        assert_eq!(config.eviction_interval(), Duration::from_secs(1800));
        assert_eq!(config.quota_interval(), Duration::from_secs(600));
        assert_eq!(config.update_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_origin_url() {
        let config = AppConfig::default();
        let origin = config.origin_url().unwrap();
        assert_eq!(origin.host_str(), Some("localhost"));
        assert_eq!(origin.port(), Some(8080));
    }

    #[test]
    fn test_origin_url_rejects_non_http() {
        let config = AppConfig { origin: "file:///srv/mylore".into(), ..Default::default() };
        assert!(matches!(config.origin_url(), Err(ConfigError::Invalid { field, .. }) if field == "origin"));
    }

    #[test]
    fn test_load_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("MYLORE_CACHE_VERSION", "mylore-v3");
            jail.set_env("MYLORE_AUTO_SKIP_WAITING", "false");
            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.cache_version, "mylore-v3");
            assert!(!config.auto_skip_waiting);
            assert_eq!(config.critical_cache, "mylore-critical-v1");
            Ok(())
        });
    }

    #[test]
    fn test_load_toml_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "mylore.toml",
                r#"
                origin = "https://lore.example"
                critical_assets = ["/", "/index.html"]
                max_cache_bytes = 1024
                "#,
            )?;
            jail.set_env("MYLORE_CONFIG_FILE", "mylore.toml");
            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.origin, "https://lore.example");
            assert_eq!(config.critical_assets, vec!["/", "/index.html"]);
            assert_eq!(config.max_cache_bytes, 1024);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("MYLORE_TIMEOUT_MS", "5");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Invalid { .. })));
            Ok(())
        });
    }
}
