//! Scheduled sidecar refresh - background task for periodic regeneration.
//!
//! Sidecars are already rewritten on every upload. The periodic pass catches
//! records edited or restored on disk by hand and sidecars written under a
//! previous baseline.

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use super::service::RefreshService;
use log::{error, info};

/// Configuration for the scheduled refresh service.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between refresh operations
    pub refresh_interval: Duration,
    /// Whether the scheduler is enabled
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(24 * 60 * 60),
            enabled: true,
        }
    }
}

/// Periodic driver for a [`RefreshService`].
pub struct RefreshScheduler {
    service: Arc<RefreshService>,
    config: SchedulerConfig,
    /// Finish time of the last successful refresh
    last_refresh_at: Arc<RwLock<Option<NaiveDateTime>>>,
}

impl RefreshScheduler {
    pub fn new(service: Arc<RefreshService>, config: SchedulerConfig) -> Self {
        Self {
            service,
            config,
            last_refresh_at: Arc::new(RwLock::new(None)),
        }
    }

    /// Finish time of the last successful refresh, if any.
    pub fn last_refresh(&self) -> Option<NaiveDateTime> {
        *self.last_refresh_at.read()
    }

    /// Run forever, refreshing once immediately and then every
    /// `refresh_interval`. Returns at once when disabled.
    ///
    /// ```rust,no_run
    /// # use std::sync::Arc;
    /// # use daca::refresh::{RefreshScheduler, RefreshService, SchedulerConfig};
    /// # fn spawn(service: Arc<RefreshService>) {
    /// let scheduler = Arc::new(RefreshScheduler::new(service, SchedulerConfig::default()));
    /// tokio::spawn(scheduler.start());
    /// # }
    /// ```
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Scheduled sidecar refresh is disabled, skipping");
            return;
        }

        info!(
            "Starting scheduled sidecar refresh with {}-second interval",
            self.config.refresh_interval.as_secs()
        );

        // the first tick completes immediately
        let mut ticker = interval(self.config.refresh_interval);
        loop {
            ticker.tick().await;
            self.do_refresh().await;
        }
    }

    /// One refresh cycle. Errors are logged and do not stop the scheduler.
    pub async fn do_refresh(&self) {
        match Arc::clone(&self.service).refresh().await {
            Ok(stats) => {
                info!(
                    "Sidecar refresh completed: {} records, {} sidecars, {} failures in {}ms",
                    stats.records_scanned, stats.sidecars_written, stats.failures, stats.duration_ms
                );
                *self.last_refresh_at.write() = Some(stats.finished_at);
            }
            Err(e) => {
                error!("Sidecar refresh failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PackageCatalog;
    use crate::context::{ServerConfig, ServerContext};

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.refresh_interval.as_secs(), 24 * 60 * 60);
    }

    #[tokio::test]
    async fn test_do_refresh_records_time() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: tmp_dir.path().to_path_buf(),
            ..Default::default()
        };
        let catalog = PackageCatalog::from_entries(["pkgA"]).unwrap();
        let ctx = Arc::new(ServerContext::with_catalog(config, catalog).unwrap());
        let scheduler = RefreshScheduler::new(
            Arc::new(RefreshService::new(ctx)),
            SchedulerConfig::default(),
        );

        assert!(scheduler.last_refresh().is_none());
        scheduler.do_refresh().await;
        assert!(scheduler.last_refresh().is_some());
    }

    #[tokio::test]
    async fn test_disabled_scheduler_returns() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: tmp_dir.path().to_path_buf(),
            ..Default::default()
        };
        let catalog = PackageCatalog::from_entries(["pkgA"]).unwrap();
        let ctx = Arc::new(ServerContext::with_catalog(config, catalog).unwrap());
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::new(RefreshService::new(ctx)),
            SchedulerConfig {
                refresh_interval: Duration::from_secs(3600),
                enabled: false,
            },
        ));
        scheduler.start().await;
    }
}
