//! `log` backend: timestamped lines to stderr and an optional log file.

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fmt;

use super::writer::LogFileWriter;

/// Crate prefix whose records pass at the configured level; other crates'
/// records are kept at warn and above.
const OWN_TARGET: &str = "daca";

pub struct ServerLogger {
    level: LevelFilter,
    stderr: bool,
    file: Option<LogFileWriter>,
}

impl ServerLogger {
    pub fn new(level: LevelFilter, stderr: bool, file: Option<LogFileWriter>) -> Self {
        Self {
            level,
            stderr,
            file,
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

/// `2024-03-05 10:00:00 WARN  daca::server::handler: message`
pub fn format_line(stamp: &str, level: Level, target: &str, args: &fmt::Arguments<'_>) -> String {
    format!("{} {:<5} {}: {}", stamp, level, target, args)
}

impl Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        if metadata.target().starts_with(OWN_TARGET) {
            metadata.level() <= self.level
        } else {
            metadata.level() <= self.level.min(LevelFilter::Warn)
        }
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let line = format_line(&stamp, record.level(), record.target(), record.args());
        if self.stderr {
            eprintln!("{}", line);
        }
        if let Some(file) = &self.file {
            if let Err(e) = file.write_line(&line) {
                eprintln!("log file write failed: {}", e);
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Err(e) = file.flush() {
                eprintln!("log file flush failed: {}", e);
            }
        }
    }
}
