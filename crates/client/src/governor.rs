//! Keeps cache storage bounded.
//!
//! Two independent checks run on their own timers:
//! - byte budget: when the summed body size of every entry exceeds the
//!   budget, the oldest entries of the dynamic generation are evicted;
//! - storage quota: when database usage passes the threshold, every
//!   generation except the most recently created ones is deleted.
//!
//! Both are advisory. Failures are logged and retried on the next tick.

use std::time::Duration;

use mylore_core::{AppConfig, CacheDb, Error};
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Byte budget for all stored bodies (default: 50MB)
    pub max_cache_bytes: u64,
    /// Entries evicted per budget run (default: 10)
    pub eviction_batch: usize,
    pub storage_quota_bytes: u64,
    /// Usage percentage above which old generations are dropped (default: 80)
    pub quota_threshold_percent: f64,
    /// Generations kept by the quota rule (default: 2)
    pub keep_generations: usize,
    pub eviction_interval: Duration,
    pub quota_interval: Duration,
}

impl From<&AppConfig> for GovernorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_cache_bytes: config.max_cache_bytes,
            eviction_batch: config.eviction_batch,
            storage_quota_bytes: config.storage_quota_bytes,
            quota_threshold_percent: config.quota_threshold_percent,
            keep_generations: config.keep_generations,
            eviction_interval: config.eviction_interval(),
            quota_interval: config.quota_interval(),
        }
    }
}

/// Storage usage against the configured quota.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
}

impl StorageEstimate {
    pub fn percent_used(&self) -> f64 {
        if self.quota == 0 {
            return 0.0;
        }
        self.usage as f64 / self.quota as f64 * 100.0
    }
}

pub struct CacheGovernor {
    db: CacheDb,
    dynamic: watch::Receiver<Option<String>>,
    config: GovernorConfig,
}

impl CacheGovernor {
    /// `dynamic` names the generation the byte budget evicts from. It is
    /// read on every run, so a version rollout moves eviction along with it.
    pub fn new(db: CacheDb, dynamic: watch::Receiver<Option<String>>, config: GovernorConfig) -> Self {
        Self { db, dynamic, config }
    }

    /// Evict the oldest dynamic entries if the byte budget is exceeded.
    ///
    /// Returns the number of entries evicted.
    pub async fn enforce_budget(&self) -> Result<u64, Error> {
        let total = self.db.total_size().await?;
        if total <= self.config.max_cache_bytes {
            tracing::debug!(bytes = total, budget = self.config.max_cache_bytes, "cache within budget");
            return Ok(0);
        }

        let dynamic = self.dynamic.borrow().clone();
        let Some(dynamic) = dynamic else {
            tracing::debug!(bytes = total, "cache over budget but no version is active");
            return Ok(0);
        };
        let evicted = self.db.evict_oldest(&dynamic, self.config.eviction_batch).await?;
        tracing::info!(
            bytes = total,
            budget = self.config.max_cache_bytes,
            generation = %dynamic,
            evicted,
            "cache over budget, evicted oldest entries"
        );
        Ok(evicted)
    }

    pub async fn estimate(&self) -> Result<StorageEstimate, Error> {
        let usage = self.db.storage_usage().await?;
        Ok(StorageEstimate { usage, quota: self.config.storage_quota_bytes })
    }

    /// Drop all but the newest generations if usage passes the threshold.
    ///
    /// Returns the number of generations deleted.
    pub async fn enforce_quota(&self) -> Result<usize, Error> {
        let estimate = self.estimate().await?;
        let percent = estimate.percent_used();
        if percent <= self.config.quota_threshold_percent {
            return Ok(0);
        }

        let names = self.db.generation_names().await?;
        let stale = names.len().saturating_sub(self.config.keep_generations);
        let mut deleted = 0;
        for name in &names[..stale] {
            if self.db.delete_generation(name).await? {
                deleted += 1;
            }
        }

        tracing::warn!(
            usage = estimate.usage,
            quota = estimate.quota,
            percent,
            deleted,
            "storage quota threshold exceeded, deleted old generations"
        );
        Ok(deleted)
    }

    async fn budget_tick(&self) {
        if let Err(e) = self.enforce_budget().await {
            tracing::error!(error = %e, "cache budget check failed");
        }
    }

    async fn quota_tick(&self) {
        if let Err(e) = self.enforce_quota().await {
            tracing::error!(error = %e, "storage quota check failed");
        }
    }

    /// Run both checks on their intervals until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now();
        let mut budget = tokio::time::interval_at(start + self.config.eviction_interval, self.config.eviction_interval);
        let mut quota = tokio::time::interval_at(start + self.config.quota_interval, self.config.quota_interval);

        loop {
            tokio::select! {
                _ = budget.tick() => self.budget_tick().await,
                _ = quota.tick() => self.quota_tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("cache governor stopped");
    }
}
