//! Temp-file-then-rename writes.
//!
//! Readers of the results directory only ever see a complete old file or a
//! complete new file. Temp files are hidden (leading `.`) and carry a random
//! suffix so concurrent writers never share one.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::DacaResult;

/// Prefix shared by every in-flight temp file.
pub const TEMP_PREFIX: &str = ".tmp-";

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_name = format!("{}{}.{}", TEMP_PREFIX, name, uuid::Uuid::new_v4().simple());
    path.with_file_name(tmp_name)
}

/// Replace `path` with `contents` atomically.
pub fn write_atomic(path: &Path, contents: &[u8]) -> DacaResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path_for(path);
    let result = (|| -> DacaResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        fs::remove_file(&tmp_path).ok();
    }
    result
}

/// Remove `path`, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> DacaResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
