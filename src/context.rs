//! Server-wide state shared by every connection.
//!
//! `ServerContext` is constructed once at startup and handed to each
//! connection task behind an `Arc`. Mutable state lives inside the catalog
//! (cursor mutex) and the result store (per-package locks).

use chrono::NaiveDateTime;
use log::info;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::catalog::{CatalogPaths, PackageCatalog};
use crate::error::{DacaError, DacaResult};
use crate::refresh::SchedulerConfig;
use crate::storage::{ResultStore, StoreConfig, DEFAULT_LATEST_CAPACITY};
use crate::types::{now_local, validate_package_name, VersionPair};

// ================================================================================================
// CONFIGURATION
// ================================================================================================

/// Default archive URL pattern. Group 1 is the package name.
pub const DEFAULT_URL_PATTERN: &str =
    r"^(?:ftp|https?)://.*pool/main/[^/]+/([^/]+)/[^/]*tar\.(?:gz|bz2|xz)$";

/// The `cppcheck:` declaration must appear within this many payload lines.
pub const VERSION_DECLARATION_WINDOW: usize = 20;

/// Size caps for everything read from a connection.
#[derive(Clone, Copy, Debug)]
pub struct BodyLimits {
    pub command_line: usize,
    pub result: usize,
    pub info: usize,
    pub nodata: usize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            command_line: 1024,
            result: 2 * 1024 * 1024,
            info: 1024 * 1024,
            nodata: 64 * 1024,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Root of the catalog files, results and logs
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Released analyzer version head is compared against
    pub baseline: String,
    /// Connections handled concurrently; further accepts wait
    pub max_connections: usize,
    pub body_limits: BodyLimits,
    /// A read that makes no progress for this long aborts the connection
    pub idle_timeout: Duration,
    pub url_pattern: String,
    pub latest_capacity: usize,
    pub stale_days: i64,
    pub refresh: SchedulerConfig,
}

pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("DACA_DATA_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("daca-data"))
        .unwrap_or_else(|| PathBuf::from("./daca-data"))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            baseline: std::env::var("DACA_BASELINE").unwrap_or_else(|_| "2.14".to_string()),
            max_connections: 64,
            body_limits: BodyLimits::default(),
            idle_timeout: Duration::from_secs(10),
            url_pattern: DEFAULT_URL_PATTERN.to_string(),
            latest_capacity: DEFAULT_LATEST_CAPACITY,
            stale_days: 30,
            refresh: SchedulerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("donated-results")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("log")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ================================================================================================
// UPLOAD VALIDATION
// ================================================================================================

/// Why an upload was discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadRejected {
    #[error("url does not look like a package archive: {0}")]
    UrlPattern(String),

    #[error("url is not in the package catalog: {0}")]
    UnknownPackage(String),

    #[error("payload does not declare the compared versions")]
    VersionsMissing,

    #[error("payload declares versions {declared:?}, expected {expected:?}")]
    VersionMismatch { declared: String, expected: String },

    #[error("unusable package name {0:?}")]
    InvalidPackageName(String),
}

/// Last path segment of `url` without archive extensions.
fn fallback_package_name(url: &str) -> &str {
    let segment = url.rsplit('/').next().unwrap_or(url);
    [".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".zip"]
        .iter()
        .find_map(|ext| segment.strip_suffix(ext))
        .unwrap_or(segment)
}

// ================================================================================================
// CONTEXT
// ================================================================================================

/// Counters shown on the overview page.
#[derive(Debug, Default)]
pub struct ServerCounters {
    pub connections: AtomicU64,
    pub uploads_accepted: AtomicU64,
    pub uploads_rejected: AtomicU64,
    pub protocol_errors: AtomicU64,
}

impl ServerCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Inputs report functions need besides the store.
#[derive(Clone, Debug)]
pub struct ReportContext {
    pub baseline: String,
    pub now: NaiveDateTime,
    pub stale_days: i64,
}

#[derive(Debug)]
pub struct ServerContext {
    pub config: ServerConfig,
    pub versions: VersionPair,
    pub catalog: PackageCatalog,
    pub store: ResultStore,
    pub counters: ServerCounters,
    pub started_at: NaiveDateTime,
    url_regex: Regex,
}

impl ServerContext {
    /// Load the catalog and open the store under `config.data_dir`.
    pub fn new(config: ServerConfig) -> DacaResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let catalog = PackageCatalog::load(CatalogPaths::in_dir(&config.data_dir))?;
        Self::with_catalog(config, catalog)
    }

    /// Build a context around an already constructed catalog.
    pub fn with_catalog(config: ServerConfig, catalog: PackageCatalog) -> DacaResult<Self> {
        let url_regex = Regex::new(&config.url_pattern)
            .map_err(|e| DacaError::Config(format!("invalid url pattern: {}", e)))?;

        let store = ResultStore::open(StoreConfig {
            results_dir: config.results_dir(),
            latest_path: config.data_dir.join("latest.txt"),
            latest_capacity: config.latest_capacity,
            baseline: config.baseline.clone(),
        })?;

        info!(
            "Server context ready: baseline {}, {} packages, results in {}",
            config.baseline,
            catalog.get_count()?,
            store.results_dir().display()
        );

        Ok(Self {
            versions: VersionPair::new(config.baseline.clone()),
            config,
            catalog,
            store,
            counters: ServerCounters::default(),
            started_at: now_local(),
            url_regex,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Package name carried by `url`, if it is an archive URL or catalog entry.
    pub fn package_name(&self, url: &str) -> Option<String> {
        if let Some(caps) = self.url_regex.captures(url) {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
        if self.catalog.contains(url) {
            return Some(fallback_package_name(url).to_string());
        }
        None
    }

    /// Check an upload's url and payload; returns the package name to store
    /// it under.
    pub fn validate_upload(&self, url: &str, payload: &str) -> Result<String, UploadRejected> {
        let package = self
            .package_name(url)
            .ok_or_else(|| UploadRejected::UrlPattern(url.to_string()))?;
        if !self.catalog.contains(url) {
            return Err(UploadRejected::UnknownPackage(url.to_string()));
        }

        let declared = payload
            .lines()
            .take(VERSION_DECLARATION_WINDOW)
            .find_map(|line| line.trim().strip_prefix(crate::storage::record::VERSIONS_PREFIX))
            .ok_or(UploadRejected::VersionsMissing)?;
        let tokens: Vec<&str> = declared.split_whitespace().collect();
        if !self.versions.matches_declared(&tokens) {
            return Err(UploadRejected::VersionMismatch {
                declared: tokens.join(" "),
                expected: self.versions.declaration(),
            });
        }

        validate_package_name(&package)
            .map_err(|_| UploadRejected::InvalidPackageName(package.clone()))?;
        Ok(package)
    }

    pub fn report_context(&self) -> ReportContext {
        ReportContext {
            baseline: self.versions.baseline.clone(),
            now: now_local(),
            stale_days: self.config.stale_days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "ftp://ftp.de.debian.org/debian/pool/main/z/zlib/zlib_1.3.orig.tar.gz";

    fn context(dir: &Path) -> ServerContext {
        let config = ServerConfig {
            data_dir: dir.to_path_buf(),
            baseline: "2.14".to_string(),
            ..Default::default()
        };
        let catalog = PackageCatalog::from_entries([URL, "pkgA"]).unwrap();
        ServerContext::with_catalog(config, catalog).unwrap()
    }

    #[test]
    fn test_accepts_matching_upload() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let ctx = context(tmp_dir.path());
        let payload = "cppcheck-options: -j1\ncppcheck: 2.14 head\ncount: 1 1\n";
        assert_eq!(ctx.validate_upload(URL, payload).unwrap(), "zlib");
    }

    #[test]
    fn test_plain_catalog_entry_uses_fallback_name() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let ctx = context(tmp_dir.path());
        assert_eq!(
            ctx.validate_upload("pkgA", "cppcheck: head 2.14\n").unwrap(),
            "pkgA"
        );
    }

    #[test]
    fn test_rejections() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let ctx = context(tmp_dir.path());

        assert!(matches!(
            ctx.validate_upload("not a url", "cppcheck: 2.14 head\n"),
            Err(UploadRejected::UrlPattern(_))
        ));
        let other = "ftp://ftp.de.debian.org/debian/pool/main/o/other/other_1.0.orig.tar.gz";
        assert!(matches!(
            ctx.validate_upload(other, "cppcheck: 2.14 head\n"),
            Err(UploadRejected::UnknownPackage(_))
        ));
        assert_eq!(
            ctx.validate_upload(URL, "count: 1 1\n"),
            Err(UploadRejected::VersionsMissing)
        );
        assert!(matches!(
            ctx.validate_upload(URL, "cppcheck: 2.13 head\n"),
            Err(UploadRejected::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_declaration_outside_window_is_missing() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let ctx = context(tmp_dir.path());
        let payload = format!("{}cppcheck: 2.14 head\n", "filler\n".repeat(25));
        assert_eq!(
            ctx.validate_upload(URL, &payload),
            Err(UploadRejected::VersionsMissing)
        );
    }

    #[test]
    fn test_fallback_name() {
        assert_eq!(fallback_package_name("http://x/y/foo-1.0.tar.gz"), "foo-1.0");
        assert_eq!(fallback_package_name("pkgA"), "pkgA");
    }
}
