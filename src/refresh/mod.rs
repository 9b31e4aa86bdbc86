//! Diff sidecar refresh.
//!
//! 1. **On demand** (RefreshService): one pass over the stored records, run at startup
//! 2. **Scheduled** (RefreshScheduler): periodic background task (24-hour default)

pub mod scheduler;
pub mod service;

pub use scheduler::{RefreshScheduler, SchedulerConfig};
pub use service::{RefreshService, RefreshStats};
