//! Process-wide logging setup.
//!
//! Everything logs through the `log` facade; [`init`] installs
//! [`ServerLogger`] as its backend once per process.

pub mod logger;
pub mod writer;

pub use logger::ServerLogger;
pub use writer::{LogFileConfig, LogFileWriter, RotationPolicy};

use log::LevelFilter;
use std::path::Path;
use std::str::FromStr;

use crate::error::{DacaError, DacaResult};

/// Environment variable holding the level filter.
pub const LEVEL_ENV: &str = "DACA_LOG";

pub const SERVER_LOG_FILE: &str = "daca-server.log";

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub stderr: bool,
    /// No file output when `None`
    pub file: Option<LogFileConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: level_from_env(),
            stderr: true,
            file: None,
        }
    }
}

impl LogConfig {
    /// Stderr plus the rotating server log under `log_dir`.
    pub fn server(log_dir: &Path) -> Self {
        Self {
            file: Some(LogFileConfig::in_dir(log_dir, SERVER_LOG_FILE)),
            ..Self::default()
        }
    }
}

/// Level named by `DACA_LOG`, `info` when unset or unparseable.
pub fn level_from_env() -> LevelFilter {
    std::env::var(LEVEL_ENV)
        .ok()
        .and_then(|value| LevelFilter::from_str(value.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the logger. Fails if a logger is already installed.
pub fn init(config: LogConfig) -> DacaResult<()> {
    let file = config.file.map(LogFileWriter::new).transpose()?;
    let logger = ServerLogger::new(config.level, config.stderr, file);
    let level = logger.level();
    log::set_logger(Box::leak(Box::new(logger)))
        .map_err(|e| DacaError::Config(format!("logger already installed: {}", e)))?;
    log::set_max_level(level);
    Ok(())
}
