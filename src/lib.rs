//! # daca
//!
//! Distributed regression testing for a static analyzer. Volunteer clients
//! scan third-party source packages with a released baseline and the
//! development head of the analyzer, then upload both result sets to a
//! coordinator. The coordinator hands out packages from a shared catalog,
//! stores one result record per package and renders regression reports
//! from them.
//!
//! ## Components
//!
//! - [`catalog`]: package manifest, shared cursor, no-data ledger
//! - [`storage`]: result records, diff sidecars, latest-results window
//! - [`diff`]: finding stream splitting and symmetric difference
//! - [`server`]: line protocol and the accept loop
//! - [`report`]: HTML and text reports over the stored records
//! - [`refresh`]: startup and periodic sidecar regeneration
//! - [`client`]: the volunteer scan pipeline

pub mod catalog;
pub mod client;
pub mod context;
pub mod diff;
pub mod error;
pub mod logging;
pub mod refresh;
pub mod report;
pub mod server;
pub mod storage;
pub mod types;

pub use catalog::{CatalogPaths, PackageCatalog};
pub use context::{ServerConfig, ServerContext};
pub use error::{DacaError, DacaResult};
pub use refresh::{RefreshScheduler, RefreshService, SchedulerConfig};
pub use storage::{ResultRecord, ResultStore};
pub use types::VersionPair;
