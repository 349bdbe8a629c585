//! Version source backed by the configuration layers.

use async_trait::async_trait;
use mylore_client::VersionSource;
use mylore_core::{AppConfig, Error, WorkerVersion};

/// Re-reads configuration on every check, so a changed `MYLORE_CACHE_VERSION`
/// or config file is picked up as a new version.
pub struct ConfigSource;

#[async_trait]
impl VersionSource for ConfigSource {
    async fn latest(&self) -> Result<WorkerVersion, Error> {
        let config = AppConfig::load().map_err(|e| Error::InvalidInput(e.to_string()))?;
        Ok(WorkerVersion::from_config(&config))
    }
}
