//! Package catalog with a durable, always-advancing cursor.
//!
//! The catalog is an ordered list of package URLs loaded once at startup.
//! Entries proven to contain no analyzable source are withdrawn in place
//! (the slot becomes empty) so every other index keeps its meaning.
//!
//! # Durability
//! `advance()` persists the new cursor before handing out the package
//! (persist-then-serve). A crash after persisting but before the reply
//! reaches the client skips that package for one round; a crash before
//! persisting re-serves it. Both are accepted failure modes.

use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{DacaError, DacaResult};
use crate::storage::atomic::write_atomic;

/// Files backing a catalog.
#[derive(Clone, Debug)]
pub struct CatalogPaths {
    /// One package URL per line
    pub manifest: PathBuf,
    /// Append-only ledger of withdrawn URLs
    pub nodata: PathBuf,
    /// Single line holding the cursor as decimal text
    pub cursor: PathBuf,
}

impl CatalogPaths {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            manifest: data_dir.join("packages.txt"),
            nodata: data_dir.join("packages_nodata.txt"),
            cursor: data_dir.join("package-index.txt"),
        }
    }
}

#[derive(Debug)]
pub struct PackageCatalog {
    entries: RwLock<Vec<Option<String>>>,
    /// Next index to serve. Always `< entries.len()`.
    cursor: Mutex<usize>,
    paths: Option<CatalogPaths>,
}

fn read_lines(path: &Path) -> DacaResult<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

impl PackageCatalog {
    /// Load the manifest, withdraw ledger entries and restore the cursor.
    ///
    /// Fails with `EmptyCatalog` when the manifest has no entries.
    pub fn load(paths: CatalogPaths) -> DacaResult<Self> {
        let manifest = read_lines(&paths.manifest)?;
        if manifest.is_empty() {
            return Err(DacaError::EmptyCatalog);
        }

        let nodata: HashSet<String> = read_lines(&paths.nodata)?.into_iter().collect();
        let entries: Vec<Option<String>> = manifest
            .into_iter()
            .map(|url| if nodata.contains(&url) { None } else { Some(url) })
            .collect();

        let cursor = match fs::read_to_string(&paths.cursor) {
            Ok(text) => match text.trim().parse::<usize>() {
                Ok(index) if index < entries.len() => index,
                Ok(index) => {
                    warn!(
                        "Cursor {} out of range for {} packages, restarting at 0",
                        index,
                        entries.len()
                    );
                    0
                }
                Err(_) => {
                    warn!("Unreadable cursor file {}, restarting at 0", paths.cursor.display());
                    0
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let withdrawn = entries.iter().filter(|e| e.is_none()).count();
        info!(
            "Loaded catalog: {} packages ({} withdrawn), cursor {}",
            entries.len(),
            withdrawn,
            cursor
        );

        Ok(Self {
            entries: RwLock::new(entries),
            cursor: Mutex::new(cursor),
            paths: Some(paths),
        })
    }

    /// In-memory catalog without persistence.
    pub fn from_entries<I, S>(entries: I) -> DacaResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: Vec<Option<String>> = entries.into_iter().map(|e| Some(e.into())).collect();
        if entries.is_empty() {
            return Err(DacaError::EmptyCatalog);
        }
        Ok(Self {
            entries: RwLock::new(entries),
            cursor: Mutex::new(0),
            paths: None,
        })
    }

    pub fn get_count(&self) -> DacaResult<usize> {
        match self.entries.read().len() {
            0 => Err(DacaError::EmptyCatalog),
            n => Ok(n),
        }
    }

    pub fn get_by_index(&self, index: usize) -> DacaResult<String> {
        let entries = self.entries.read();
        match entries.get(index) {
            Some(Some(url)) => Ok(url.clone()),
            Some(None) => Err(DacaError::PackageWithdrawn(index)),
            None => Err(DacaError::IndexOutOfRange {
                index,
                len: entries.len(),
            }),
        }
    }

    /// Serve the package at the cursor, skipping withdrawn slots, and move the
    /// cursor one past it (wrapping). Returns the served index and URL.
    pub fn advance(&self) -> DacaResult<(usize, String)> {
        let mut cursor = self.cursor.lock();
        let entries = self.entries.read();
        let len = entries.len();
        if len == 0 {
            return Err(DacaError::EmptyCatalog);
        }

        for step in 0..len {
            let index = (*cursor + step) % len;
            if let Some(url) = &entries[index] {
                let next = (index + 1) % len;
                self.persist_cursor(next)?;
                *cursor = next;
                return Ok((index, url.clone()));
            }
        }
        Err(DacaError::NoEligiblePackages)
    }

    fn persist_cursor(&self, next: usize) -> DacaResult<()> {
        if let Some(paths) = &self.paths {
            write_atomic(&paths.cursor, next.to_string().as_bytes())?;
        }
        Ok(())
    }

    /// True if `url` is a live catalog entry.
    pub fn contains(&self, url: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.as_deref() == Some(url))
    }

    /// Withdraw every live slot holding `url` and record it in the no-data
    /// ledger. Returns how many slots were withdrawn; unknown URLs are ignored.
    pub fn mark_empty(&self, url: &str) -> DacaResult<usize> {
        let mut entries = self.entries.write();
        let mut withdrawn = 0;
        for entry in entries.iter_mut() {
            if entry.as_deref() == Some(url) {
                *entry = None;
                withdrawn += 1;
            }
        }
        if withdrawn == 0 {
            return Ok(0);
        }

        if let Some(paths) = &self.paths {
            let mut ledger = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&paths.nodata)?;
            writeln!(ledger, "{}", url)?;
            ledger.sync_all()?;
        }
        info!("Withdrew package {} ({} slot(s))", url, withdrawn);
        Ok(withdrawn)
    }

    pub fn cursor(&self) -> usize {
        *self.cursor.lock()
    }

    pub fn withdrawn_count(&self) -> usize {
        self.entries.read().iter().filter(|e| e.is_none()).count()
    }
}
