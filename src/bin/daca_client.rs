//! # daca@home Volunteer Client
//!
//! Scans packages with the baseline and head analyzer and uploads the
//! results to the coordinator.
//!
//! Usage:
//!   daca-client [-j N] [--max-packages N] [--stop-time HH:MM]
//!   daca-client --package URL --no-upload
//!   daca-client --package-urls FILE

use chrono::NaiveTime;
use clap::Parser;
use daca::client::fetch::parse_rate;
use daca::client::{ClientConfig, ClientPipeline};
use daca::logging::{self, LogConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "daca-client")]
#[command(version, about = "daca@home volunteer client", long_about = None)]
struct Cli {
    /// Analyzer and build jobs
    #[arg(short = 'j', default_value_t = 1)]
    jobs: usize,

    /// Scan only this package url
    #[arg(long)]
    package: Option<String>,

    /// File with package urls, one per line
    #[arg(long)]
    package_urls: Option<PathBuf>,

    /// Stop once the local time reaches HH:MM
    #[arg(long, value_parser = parse_stop_time)]
    stop_time: Option<NaiveTime>,

    /// Working directory for checkouts and packages
    #[arg(long)]
    work_path: Option<PathBuf>,

    /// Download limit in bytes per second (suffix k or m)
    #[arg(long, value_parser = parse_bandwidth)]
    bandwidth_limit: Option<u64>,

    /// Stop after this many packages
    #[arg(long)]
    max_packages: Option<usize>,

    /// Print results instead of uploading them
    #[arg(long)]
    no_upload: bool,

    /// Coordinator address
    #[arg(long, default_value = daca::client::pipeline::DEFAULT_SERVER)]
    server: String,

    /// Per-scan timeout in seconds
    #[arg(long, default_value_t = 3600)]
    timeout: u64,

    /// Skip the debugger re-run of crashed scans
    #[arg(long)]
    no_debugger: bool,
}

fn parse_stop_time(text: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(text, "%H:%M").map_err(|e| format!("expected HH:MM: {}", e))
}

fn parse_bandwidth(text: &str) -> Result<u64, String> {
    parse_rate(text).ok_or_else(|| format!("invalid rate {:?}", text))
}

fn read_package_list(path: &PathBuf) -> Result<Vec<String>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(LogConfig::default())?;

    let mut config = ClientConfig {
        server: cli.server,
        jobs: cli.jobs.max(1),
        stop_time: cli.stop_time,
        max_packages: cli.max_packages,
        upload: !cli.no_upload,
        bandwidth_limit: cli.bandwidth_limit,
        ..Default::default()
    };
    if let Some(path) = cli.work_path {
        config.work_path = path;
    }
    if let Some(url) = cli.package {
        config.packages.push(url);
    }
    if let Some(path) = cli.package_urls {
        config.packages.extend(read_package_list(&path)?);
    }
    config.scan.timeout = Duration::from_secs(cli.timeout);
    config.scan.use_debugger = !cli.no_debugger;

    println!("daca-client {}", daca::client::pipeline::CLIENT_VERSION);
    println!("  - Server: {}", config.server);
    println!("  - Work path: {}", config.work_path.display());
    println!("  - Jobs: {}", config.jobs);
    if !config.upload {
        println!("  - Upload disabled");
    }
    println!();

    let mut pipeline = ClientPipeline::new(config)?;
    let reason = pipeline.run().await?;
    println!("Stopped: {:?}", reason);
    Ok(())
}
