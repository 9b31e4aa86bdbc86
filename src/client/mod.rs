//! Volunteer client: builds both analyzer versions, scans packages handed
//! out by the coordinator and uploads the results.

pub mod builds;
pub mod connection;
pub mod fetch;
pub mod pipeline;
pub mod process;
pub mod runner;

pub use connection::{CoordinatorClient, RetryPolicy};
pub use pipeline::{ClientConfig, ClientPipeline, StopReason};
pub use runner::{ScanConfig, ScanOutcome, ScanRunner};
