//! Worker versions and the asset manifest they precache.

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

/// Ordered list of root-relative paths that must be in the critical
/// generation once a version has installed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AssetManifest {
    paths: Vec<String>,
}

impl AssetManifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { paths: paths.into_iter().map(Into::into).collect() }
    }

    /// Exact path match; query strings and fragments are not part of `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// A worker version, identified by its generation names.
///
/// `tag` is the version generation name; `critical` and `dynamic` are the
/// generations the version reads and writes. Any other generation is stale
/// once this version activates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct WorkerVersion {
    pub tag: String,
    pub critical: String,
    pub dynamic: String,
    pub manifest: AssetManifest,
}

impl WorkerVersion {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tag: config.cache_version.clone(),
            critical: config.critical_cache.clone(),
            dynamic: config.dynamic_cache.clone(),
            manifest: AssetManifest::new(config.critical_assets.iter().cloned()),
        }
    }

    /// Whether `generation` belongs to this version and survives activation.
    pub fn owns_generation(&self, generation: &str) -> bool {
        generation == self.critical || generation == self.dynamic || generation == self.tag
    }
}
