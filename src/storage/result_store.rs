//! Durable result store: one text file per package plus derived sidecars.
//!
//! # Layout
//! ```text
//! <results_dir>/<package>                  result record
//! <results_dir>/<package>.diff             diff statistics sidecar (JSON)
//! <results_dir>/info_output/<package>      information-only record
//! ```
//!
//! Every write goes through temp-file-then-rename, so a reader iterating the
//! directory never observes a half-written file. Writers for the same package
//! are serialized by a per-package lock; different packages never contend.

use chrono::NaiveDateTime;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::atomic::{remove_if_exists, write_atomic, TEMP_PREFIX};
use super::latest::LatestResultsWindow;
use super::record::ResultRecord;
use super::sidecar::DiffStatSidecar;
use crate::error::DacaResult;
use crate::types::{format_upload_time, validate_package_name};

/// Sub-directory holding information-only records.
pub const INFO_DIR: &str = "info_output";
/// Extension of diff statistics sidecars.
pub const SIDECAR_EXTENSION: &str = "diff";

/// Storage locations and the baseline sidecars are computed against.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub results_dir: PathBuf,
    pub latest_path: PathBuf,
    pub latest_capacity: usize,
    pub baseline: String,
}

/// Statistics about stored results.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub results: usize,
    pub sidecars: usize,
    pub info_records: usize,
}

pub struct ResultStore {
    results_dir: PathBuf,
    info_dir: PathBuf,
    baseline: String,
    latest: LatestResultsWindow,
    /// package name -> write lock
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore")
            .field("results_dir", &self.results_dir)
            .field("baseline", &self.baseline)
            .field("latest", &self.latest)
            .finish()
    }
}

impl ResultStore {
    /// Open or create the store directories.
    pub fn open(config: StoreConfig) -> DacaResult<Self> {
        let info_dir = config.results_dir.join(INFO_DIR);
        fs::create_dir_all(&info_dir)?;

        let latest = LatestResultsWindow::open(&config.latest_path, config.latest_capacity)?;

        Ok(Self {
            results_dir: config.results_dir,
            info_dir,
            baseline: config.baseline,
            latest,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn info_dir(&self) -> &Path {
        &self.info_dir
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    fn key_lock(&self, package: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(package.to_string()).or_default())
    }

    fn result_path(&self, package: &str) -> PathBuf {
        self.results_dir.join(package)
    }

    fn sidecar_path(&self, package: &str) -> PathBuf {
        self.results_dir
            .join(format!("{}.{}", package, SIDECAR_EXTENSION))
    }

    fn stamped(record_text: &str, upload_time: NaiveDateTime) -> String {
        let mut text = format!("{}\n{}", format_upload_time(upload_time), record_text);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text
    }

    // ============================================================================================
    // WRITES
    // ============================================================================================

    /// Replace the record for `package`, refresh its sidecar and push it onto
    /// the latest-results window.
    pub fn write_result(
        &self,
        package: &str,
        record_text: &str,
        upload_time: NaiveDateTime,
    ) -> DacaResult<()> {
        validate_package_name(package)?;
        let lock = self.key_lock(package);
        {
            let _guard = lock.lock();
            let text = Self::stamped(record_text, upload_time);
            write_atomic(&self.result_path(package), text.as_bytes())?;
            self.write_sidecar(package, &text)?;
        }
        self.latest.push(package)?;
        debug!("Stored result for {}", package);
        Ok(())
    }

    /// Replace the information-only record for `package`.
    pub fn write_info(
        &self,
        package: &str,
        info_text: &str,
        upload_time: NaiveDateTime,
    ) -> DacaResult<()> {
        validate_package_name(package)?;
        let lock = self.key_lock(&format!("{}/{}", INFO_DIR, package));
        let _guard = lock.lock();
        let text = Self::stamped(info_text, upload_time);
        write_atomic(&self.info_dir.join(package), text.as_bytes())?;
        debug!("Stored info output for {}", package);
        Ok(())
    }

    fn write_sidecar(&self, package: &str, record_text: &str) -> DacaResult<bool> {
        let record = ResultRecord::parse(package, record_text);
        let path = self.sidecar_path(package);
        match DiffStatSidecar::from_record(&record, &self.baseline) {
            Some(sidecar) => {
                write_atomic(&path, &sidecar.to_bytes()?)?;
                Ok(true)
            }
            None => {
                remove_if_exists(&path)?;
                Ok(false)
            }
        }
    }

    /// Recompute the sidecar of `package` from its stored record. Returns
    /// whether a sidecar exists afterwards.
    pub fn regenerate_sidecar(&self, package: &str) -> DacaResult<bool> {
        validate_package_name(package)?;
        let lock = self.key_lock(package);
        let _guard = lock.lock();
        match fs::read_to_string(self.result_path(package)) {
            Ok(text) => self.write_sidecar(package, &text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                remove_if_exists(&self.sidecar_path(package))?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ============================================================================================
    // READS
    // ============================================================================================

    /// Names of stored records in `dir`, sorted.
    fn record_names(dir: &Path) -> DacaResult<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                !name.starts_with(TEMP_PREFIX)
                    && !name.ends_with(&format!(".{}", SIDECAR_EXTENSION))
                    && validate_package_name(name).is_ok()
            })
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn package_names(&self) -> DacaResult<Vec<String>> {
        Self::record_names(&self.results_dir)
    }

    /// Lazily parsed records in file name order.
    pub fn iter_results(&self) -> DacaResult<RecordIter> {
        Ok(RecordIter::new(self.results_dir.clone(), self.package_names()?))
    }

    /// Lazily parsed information-only records in file name order.
    pub fn iter_info(&self) -> DacaResult<RecordIter> {
        Ok(RecordIter::new(
            self.info_dir.clone(),
            Self::record_names(&self.info_dir)?,
        ))
    }

    pub fn read_result(&self, package: &str) -> DacaResult<Option<ResultRecord>> {
        validate_package_name(package)?;
        read_record(&self.results_dir, package)
    }

    pub fn read_sidecar(&self, package: &str) -> DacaResult<Option<DiffStatSidecar>> {
        validate_package_name(package)?;
        match fs::read(self.sidecar_path(package)) {
            Ok(bytes) => Ok(Some(DiffStatSidecar::from_bytes(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable sidecar with its package name. Corrupt sidecars are
    /// logged and skipped.
    pub fn sidecars(&self) -> DacaResult<Vec<(String, DiffStatSidecar)>> {
        let mut out = Vec::new();
        for package in self.package_names()? {
            match self.read_sidecar(&package) {
                Ok(Some(sidecar)) => out.push((package, sidecar)),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable sidecar for {}: {}", package, e),
            }
        }
        Ok(out)
    }

    /// Records named in the latest-results window, newest first.
    pub fn recent(&self) -> Vec<ResultRecord> {
        self.latest
            .names()
            .iter()
            .rev()
            .filter_map(|name| match read_record(&self.results_dir, name) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable latest result {}: {}", name, e);
                    None
                }
            })
            .collect()
    }

    pub fn latest_names(&self) -> Vec<String> {
        self.latest.names()
    }

    /// Resolve a request path to a file inside the results directory.
    /// Paths that would escape the directory resolve to `None`.
    pub fn resolve_static(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative.trim_start_matches('/'));
        let mut path = self.results_dir.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    if part.to_string_lossy().starts_with('.') {
                        return None;
                    }
                    path.push(part);
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        if path.is_file() {
            Some(path)
        } else {
            None
        }
    }

    pub fn stats(&self) -> DacaResult<StoreStats> {
        let results = self.package_names()?;
        let sidecars = results
            .iter()
            .filter(|p| self.sidecar_path(p).is_file())
            .count();
        Ok(StoreStats {
            results: results.len(),
            sidecars,
            info_records: Self::record_names(&self.info_dir)?.len(),
        })
    }
}

fn read_record(dir: &Path, package: &str) -> DacaResult<Option<ResultRecord>> {
    match fs::read(dir.join(package)) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            Ok(Some(ResultRecord::parse(package, &text)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Lazy record sequence. Files that disappear between listing and reading
/// are skipped.
pub struct RecordIter {
    dir: PathBuf,
    names: std::vec::IntoIter<String>,
}

impl RecordIter {
    fn new(dir: PathBuf, names: Vec<String>) -> Self {
        Self {
            dir,
            names: names.into_iter(),
        }
    }
}

impl Iterator for RecordIter {
    type Item = ResultRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for name in self.names.by_ref() {
            match read_record(&self.dir, &name) {
                Ok(Some(record)) => return Some(record),
                Ok(None) => debug!("Result {} vanished while iterating", name),
                Err(e) => warn!("Skipping unreadable result {}: {}", name, e),
            }
        }
        None
    }
}
