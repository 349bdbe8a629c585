//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use std::collections::HashSet;

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `origin` is not an http(s) URL
    /// - a generation name is empty or two roles share a name
    /// - a manifest path is not root-relative (`//host/x` is protocol-relative)
    ///   or is listed twice
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - an interval, `eviction_batch` or `keep_generations` is 0
    /// - `quota_threshold_percent` is outside (0, 100]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.origin_url()?;

        let names = [
            ("cache_version", &self.cache_version),
            ("critical_cache", &self.critical_cache),
            ("dynamic_cache", &self.dynamic_cache),
        ];
        for (field, name) in names {
            if name.trim().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }
        let distinct: HashSet<&str> = names.iter().map(|(_, name)| name.as_str()).collect();
        if distinct.len() != names.len() {
            return Err(invalid("cache_version", "generation names must be distinct"));
        }

        let mut seen = HashSet::new();
        for path in &self.critical_assets {
            if !path.starts_with('/') || path.starts_with("//") {
                return Err(invalid("critical_assets", format!("{path} is not root-relative")));
            }
            if !seen.insert(path.as_str()) {
                return Err(invalid("critical_assets", format!("{path} is listed twice")));
            }
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.max_body_bytes == 0 {
            return Err(invalid("max_body_bytes", "must be greater than 0"));
        }

        if self.eviction_batch == 0 {
            return Err(invalid("eviction_batch", "must be greater than 0"));
        }
        if self.keep_generations == 0 {
            return Err(invalid("keep_generations", "must keep at least one generation"));
        }
        if !(self.quota_threshold_percent > 0.0 && self.quota_threshold_percent <= 100.0) {
            return Err(invalid("quota_threshold_percent", "must be within (0, 100]"));
        }

        for (field, secs) in [
            ("eviction_interval_secs", self.eviction_interval_secs),
            ("quota_interval_secs", self.quota_interval_secs),
            ("update_interval_secs", self.update_interval_secs),
        ] {
            if secs == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.backend_hosts.iter().any(|host| host.is_empty()) {
            tracing::warn!("empty backend host pattern matches every host; ignoring it during routing");
        }

        Ok(())
    }
}
