//! Sidecar refresh service.
//!
//! Rebuilds every diff sidecar from its stored record. Run once at startup
//! so sidecars follow the configured baseline, then periodically by the
//! [`RefreshScheduler`](super::RefreshScheduler).

use log::warn;
use std::sync::Arc;
use std::time::Instant;

use crate::context::ServerContext;
use crate::error::DacaResult;
use crate::types::now_local;
use chrono::NaiveDateTime;

/// Statistics from a refresh operation.
#[derive(Debug, Clone)]
pub struct RefreshStats {
    /// Records whose sidecar was recomputed
    pub records_scanned: usize,
    /// Sidecars present afterwards
    pub sidecars_written: usize,
    /// Records that could not be refreshed
    pub failures: usize,
    /// Duration of refresh operation in milliseconds
    pub duration_ms: u64,
    /// When the refresh finished
    pub finished_at: NaiveDateTime,
}

/// Sidecar refresh service.
pub struct RefreshService {
    ctx: Arc<ServerContext>,
}

impl RefreshService {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Regenerate every sidecar, blocking the calling thread.
    ///
    /// A record that fails to refresh is logged and counted; the pass goes
    /// on with the next one.
    pub fn refresh_sidecars(&self) -> DacaResult<RefreshStats> {
        let start = Instant::now();
        let store = &self.ctx.store;

        let mut stats = RefreshStats {
            records_scanned: 0,
            sidecars_written: 0,
            failures: 0,
            duration_ms: 0,
            finished_at: now_local(),
        };
        for package in store.package_names()? {
            stats.records_scanned += 1;
            match store.regenerate_sidecar(&package) {
                Ok(true) => stats.sidecars_written += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.failures += 1;
                    warn!("Sidecar refresh failed for {}: {}", package, e);
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        stats.finished_at = now_local();
        Ok(stats)
    }

    /// [`refresh_sidecars`](Self::refresh_sidecars) on the blocking pool.
    pub async fn refresh(self: Arc<Self>) -> DacaResult<RefreshStats> {
        tokio::task::spawn_blocking(move || self.refresh_sidecars())
            .await
            .map_err(std::io::Error::from)?
    }
}
