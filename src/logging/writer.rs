//! # Log File Writer
//!
//! Rotation-capable, thread-safe line writer for the server log. Rotated
//! files are renamed with a timestamp suffix and optionally gzip-compressed;
//! only the newest `max_rotated_files` are kept.

use chrono::{Local, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::DacaResult;

/// File rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Rotate when file exceeds size (bytes)
    BySize(u64),

    /// Rotate when the local date changes
    Daily,

    /// No rotation
    Never,
}

/// Log file writer configuration
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    /// Directory holding the current and rotated files
    pub dir: PathBuf,

    /// Name of the current file, also the prefix of rotated ones
    pub file_name: String,

    pub rotation: RotationPolicy,

    /// Enable compression for rotated logs
    pub compress_rotated: bool,

    /// Maximum number of rotated files to keep
    pub max_rotated_files: usize,

    /// Buffer size for writes (bytes)
    pub buffer_size: usize,

    /// Flush after every line
    pub immediate_flush: bool,
}

impl LogFileConfig {
    pub fn in_dir(dir: impl Into<PathBuf>, file_name: &str) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.to_string(),
            rotation: RotationPolicy::BySize(50 * 1024 * 1024),
            compress_rotated: true,
            max_rotated_files: 10,
            buffer_size: 8192,
            immediate_flush: true,
        }
    }
}

struct LogFile {
    writer: BufWriter<File>,
    opened_on: NaiveDate,
    bytes_written: u64,
    lines_written: u64,
}

/// Thread-safe log file writer
pub struct LogFileWriter {
    config: LogFileConfig,
    current: Mutex<Option<LogFile>>,
    rotations: Mutex<u64>,
}

impl std::fmt::Debug for LogFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFileWriter")
            .field("path", &self.current_path())
            .field("rotation", &self.config.rotation)
            .finish()
    }
}

impl LogFileWriter {
    /// Open (appending) the current log file, creating the directory.
    pub fn new(config: LogFileConfig) -> DacaResult<Self> {
        fs::create_dir_all(&config.dir)?;
        let writer = LogFileWriter {
            config,
            current: Mutex::new(None),
            rotations: Mutex::new(0),
        };
        {
            let mut guard = writer.current.lock();
            *guard = Some(writer.open_current()?);
        }
        Ok(writer)
    }

    pub fn current_path(&self) -> PathBuf {
        self.config.dir.join(&self.config.file_name)
    }

    /// Append one line (a trailing newline is added).
    pub fn write_line(&self, line: &str) -> DacaResult<()> {
        let mut guard = self.current.lock();
        if guard.is_none() {
            *guard = Some(self.open_current()?);
        }

        if let Some(file) = guard.as_mut() {
            file.writer.write_all(line.as_bytes())?;
            file.writer.write_all(b"\n")?;
            if self.config.immediate_flush {
                file.writer.flush()?;
            }
            file.bytes_written += line.len() as u64 + 1;
            file.lines_written += 1;
        }

        let rotate = guard.as_ref().map_or(false, |file| self.should_rotate(file));
        if rotate {
            self.rotate_locked(&mut guard)?;
        }
        Ok(())
    }

    /// Flush pending writes
    pub fn flush(&self) -> DacaResult<()> {
        if let Some(file) = self.current.lock().as_mut() {
            file.writer.flush()?;
        }
        Ok(())
    }

    /// Check if rotation is needed
    fn should_rotate(&self, file: &LogFile) -> bool {
        match self.config.rotation {
            RotationPolicy::BySize(max_bytes) => file.bytes_written >= max_bytes,
            RotationPolicy::Daily => Local::now().date_naive() > file.opened_on,
            RotationPolicy::Never => false,
        }
    }

    fn open_current(&self) -> DacaResult<LogFile> {
        let path = self.current_path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let existing = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(LogFile {
            writer: BufWriter::with_capacity(self.config.buffer_size, file),
            opened_on: Local::now().date_naive(),
            bytes_written: existing,
            lines_written: 0,
        })
    }

    fn rotate_locked(&self, guard: &mut Option<LogFile>) -> DacaResult<()> {
        if let Some(mut old) = guard.take() {
            old.writer.flush()?;
            drop(old);

            let rotated = self.next_rotated_path();
            fs::rename(self.current_path(), &rotated)?;
            if self.config.compress_rotated {
                compress_file(&rotated)?;
            }
            self.cleanup_old_files()?;
        }
        *guard = Some(self.open_current()?);
        Ok(())
    }

    /// `<file_name>.<timestamp>-<seq>`; never collides with an existing
    /// rotated file, compressed or not.
    fn next_rotated_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let mut seq = self.rotations.lock();
        loop {
            *seq += 1;
            let name = format!("{}.{}-{:04}", self.config.file_name, stamp, *seq);
            let path = self.config.dir.join(&name);
            let gz = self.config.dir.join(format!("{}.gz", name));
            if !path.exists() && !gz.exists() {
                return path;
            }
        }
    }

    fn rotated_files(&self) -> DacaResult<Vec<PathBuf>> {
        let prefix = format!("{}.", self.config.file_name);
        let mut files: Vec<PathBuf> = fs::read_dir(&self.config.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| name.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect();
        // timestamp-sequence suffixes sort chronologically
        files.sort();
        Ok(files)
    }

    /// Clean up old rotated files
    fn cleanup_old_files(&self) -> DacaResult<()> {
        let files = self.rotated_files()?;
        if files.len() > self.config.max_rotated_files {
            let excess = files.len() - self.config.max_rotated_files;
            for path in &files[..excess] {
                fs::remove_file(path).ok();
            }
        }
        Ok(())
    }

    /// Get current file stats
    pub fn stats(&self) -> Option<LogFileStats> {
        let guard = self.current.lock();
        guard.as_ref().map(|file| LogFileStats {
            path: self.current_path(),
            bytes_written: file.bytes_written,
            lines_written: file.lines_written,
            opened_on: file.opened_on,
        })
    }
}

/// Compress a rotated file to `<path>.gz` and remove the original.
fn compress_file(path: &Path) -> DacaResult<()> {
    let input = fs::read(path)?;
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");

    let output = File::create(PathBuf::from(gz_name))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?;

    fs::remove_file(path).ok();
    Ok(())
}

/// Statistics for the current log file
#[derive(Debug, Clone)]
pub struct LogFileStats {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub lines_written: u64,
    pub opened_on: NaiveDate,
}
