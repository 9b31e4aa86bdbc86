//! # daca@home Coordinator Entry Point
//!
//! Loads the package catalog, opens the result store and serves the line
//! protocol and the reports until Ctrl-C.

use clap::Parser;
use daca::logging::{self, LogConfig};
use daca::refresh::{RefreshScheduler, RefreshService};
use daca::{server, ServerConfig, ServerContext};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "daca-server")]
#[command(version, about = "daca@home work coordinator and report server", long_about = None)]
struct Cli {
    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Test mode: listen on port 8001 unless --port is given
    #[arg(long)]
    test: bool,

    /// Directory holding the catalog, results and logs
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Released analyzer version head is compared against
    #[arg(long)]
    baseline: Option<String>,

    /// Connections served concurrently
    #[arg(long)]
    max_connections: Option<usize>,

    /// Disable the periodic sidecar refresh
    #[arg(long)]
    no_refresh: bool,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::default();
        if self.test {
            config.port = 8001;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(baseline) = self.baseline {
            config.baseline = baseline;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if self.no_refresh {
            config.refresh.enabled = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config();

    println!("=================================================");
    println!("  daca@home - Coordinator & Report Server        ");
    println!("=================================================");
    println!();

    logging::init(LogConfig::server(&config.log_dir()))?;

    println!("Loading package catalog from {}...", config.data_dir.display());
    let ctx = match ServerContext::new(config) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            eprintln!("✗ Failed to start: {}", e);
            return Err(e.into());
        }
    };
    println!("✓ Coordinator ready");
    println!("  - Packages: {}", ctx.catalog.get_count()?);
    println!("  - Withdrawn: {}", ctx.catalog.withdrawn_count());
    println!("  - Cursor: {}", ctx.catalog.cursor());
    println!("  - Comparing: {}", ctx.versions.wire_reply());
    println!("  - Results: {}", ctx.store.results_dir().display());
    println!();

    let service = Arc::new(RefreshService::new(Arc::clone(&ctx)));
    let scheduler = Arc::new(RefreshScheduler::new(
        Arc::clone(&service),
        ctx.config.refresh.clone(),
    ));
    if ctx.config.refresh.enabled {
        tokio::spawn(scheduler.start());
    } else {
        // still bring sidecars in line with the configured baseline once
        match service.refresh().await {
            Ok(stats) => info!(
                "Startup sidecar refresh: {} records, {} sidecars",
                stats.records_scanned, stats.sidecars_written
            ),
            Err(e) => error!("Startup sidecar refresh failed: {}", e),
        }
    }

    println!("Listening on {}", ctx.config.bind_addr());
    println!();

    server::run(Arc::clone(&ctx), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl-C received, shutting down");
    })
    .await?;

    println!("=================================================");
    println!("  Coordinator Shut Down");
    println!("=================================================");

    Ok(())
}
