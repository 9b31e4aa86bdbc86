//! Flat-file result storage.
//!
//! - **Records**: one text file per package, replaced on every upload
//! - **Sidecars**: per-package diff statistics derived from a record
//! - **Latest**: bounded window of the most recently written packages
//!
//! All writes go through [`atomic::write_atomic`].

pub mod atomic;
pub mod latest;
pub mod record;
pub mod result_store;
pub mod sidecar;

pub use latest::{LatestResultsWindow, DEFAULT_LATEST_CAPACITY};
pub use record::{finding_id, ResultRecord, ScanCount};
pub use result_store::{RecordIter, ResultStore, StoreConfig, StoreStats};
pub use sidecar::{DiffCounts, DiffStatSidecar};
