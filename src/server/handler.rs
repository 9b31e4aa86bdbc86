//! Per-connection command dispatch.
//!
//! Every error raised while serving a connection ends at
//! [`handle_connection`], where it is logged and counted. Nothing here can
//! reach the accept loop.

use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::protocol::{
    parse_command_line, read_body, read_command_line, split_upload, BodyFraming, Command,
    ProtocolError,
};
use crate::context::{ServerContext, ServerCounters};
use crate::error::{DacaError, DacaResult};
use crate::report;
use crate::types::now_local;

/// Serve one connection to completion and log how it ended.
pub async fn handle_connection(ctx: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    ServerCounters::bump(&ctx.counters.connections);
    match serve_connection(&ctx, stream, peer).await {
        Ok(command) => debug!("{} - {} done", peer, command),
        Err(DacaError::Protocol(ProtocolError::Closed)) => {
            debug!("{} - closed without a command", peer)
        }
        Err(DacaError::Protocol(e)) => {
            ServerCounters::bump(&ctx.counters.protocol_errors);
            warn!("{} - protocol error: {}", peer, e);
        }
        Err(DacaError::Rejected(e)) => {
            ServerCounters::bump(&ctx.counters.uploads_rejected);
            warn!("{} - upload discarded: {}", peer, e);
        }
        Err(e) => error!("{} - {}", peer, e),
    }
}

/// Run store and report work off the async workers.
async fn blocking<T, F>(ctx: &Arc<ServerContext>, work: F) -> DacaResult<T>
where
    F: FnOnce(&ServerContext) -> DacaResult<T> + Send + 'static,
    T: Send + 'static,
{
    let ctx = Arc::clone(ctx);
    tokio::task::spawn_blocking(move || work(&ctx))
        .await
        .map_err(std::io::Error::from)?
}

async fn reply<W>(writer: &mut W, bytes: &[u8]) -> DacaResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

async fn serve_connection(
    ctx: &Arc<ServerContext>,
    stream: TcpStream,
    peer: SocketAddr,
) -> DacaResult<Command> {
    let limits = ctx.config.body_limits;
    let idle = ctx.config.idle_timeout;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let line = read_command_line(&mut reader, limits.command_line, idle).await?;
    let command = parse_command_line(&line)?;
    debug!("{} - {}", peer, command);

    match &command {
        Command::GetVersions => {
            reply(&mut write_half, ctx.versions.wire_reply().as_bytes()).await?;
        }
        Command::Get => {
            let (index, url) = blocking(ctx, |ctx| ctx.catalog.advance()).await?;
            info!("{} - get: package {} {}", peer, index, url);
            reply(&mut write_half, url.as_bytes()).await?;
        }
        Command::GetPackageIdx(index) => match ctx.catalog.get_by_index(*index) {
            Ok(url) => {
                info!("{} - getPackageIdx: package {} {}", peer, index, url);
                reply(&mut write_half, url.as_bytes()).await?;
            }
            // out of range and withdrawn indexes close without a reply
            Err(e @ (DacaError::IndexOutOfRange { .. } | DacaError::PackageWithdrawn(_))) => {
                info!("{} - getPackageIdx: {}", peer, e);
            }
            Err(e) => return Err(e),
        },
        Command::GetPackagesCount => {
            let count = ctx.catalog.get_count()?;
            reply(&mut write_half, count.to_string().as_bytes()).await?;
        }
        Command::Write | Command::WriteInfo => {
            let info_only = command == Command::WriteInfo;
            let limit = if info_only { limits.info } else { limits.result };
            let body = read_body(&mut reader, limit, idle, BodyFraming::Terminated).await?;
            let (url, payload) = split_upload(&body)?;
            let package = ctx.validate_upload(url, payload)?;

            let record_text = format!("{}\n{}", url, payload);
            let stored_as = package.clone();
            blocking(ctx, move |ctx| {
                if info_only {
                    ctx.store.write_info(&stored_as, &record_text, now_local())
                } else {
                    ctx.store.write_result(&stored_as, &record_text, now_local())
                }
            })
            .await?;
            ServerCounters::bump(&ctx.counters.uploads_accepted);
            info!("{} - {}: stored {} ({} bytes)", peer, command, package, body.len());
        }
        Command::WriteNodata => {
            let body = read_body(&mut reader, limits.nodata, idle, BodyFraming::UntilQuiet).await?;
            let url = body.lines().next().map(str::trim).unwrap_or_default();
            if url.is_empty() {
                return Err(ProtocolError::MissingUrl.into());
            }
            let url = url.to_string();
            let marked = {
                let url = url.clone();
                blocking(ctx, move |ctx| ctx.catalog.mark_empty(&url)).await?
            };
            if marked == 0 {
                warn!("{} - write_nodata: {} is not in the catalog", peer, url);
            } else {
                info!("{} - write_nodata: withdrew {}", peer, url);
            }
        }
        Command::HttpGet(target) => {
            let target = target.clone();
            let response = blocking(ctx, move |ctx| Ok(report::route(ctx, &target))).await?;
            reply(&mut write_half, &response.to_bytes()).await?;
        }
    }

    // The peer may already be gone; the reply has been flushed either way.
    let _ = write_half.shutdown().await;
    Ok(command)
}
