//! Semaphore-gated accept loop.

use log::{error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use super::handler::handle_connection;
use crate::context::ServerContext;
use crate::error::{DacaError, DacaResult};

/// Back-off after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accept connections until the process exits.
pub async fn serve(ctx: Arc<ServerContext>, listener: TcpListener) -> DacaResult<()> {
    serve_until(ctx, listener, std::future::pending()).await
}

/// Accept connections until `shutdown` resolves, then wait for in-flight
/// connections to finish.
///
/// At most `max_connections` connections are served at once; further
/// connections stay in the listen backlog until a permit frees up. Each
/// connection runs in its own task and a panic inside it is logged and
/// contained there.
pub async fn serve_until<F>(
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    shutdown: F,
) -> DacaResult<()>
where
    F: Future<Output = ()>,
{
    let limit = ctx.config.max_connections.max(1);
    let all_permits = u32::try_from(limit)
        .map_err(|_| DacaError::Config(format!("max_connections too large: {}", limit)))?;
    let permits = Arc::new(Semaphore::new(limit));

    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {} ({} concurrent connections)", addr, limit);
    }

    tokio::pin!(shutdown);
    loop {
        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            },
        };

        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let _permit = permit;
            let connection = tokio::spawn(handle_connection(ctx, stream, peer));
            if let Err(e) = connection.await {
                if e.is_panic() {
                    error!("{} - connection handler panicked", peer);
                }
            }
        });
    }

    drop(listener);
    let in_flight = limit - permits.available_permits();
    info!("Stopped accepting; waiting for {} connection(s)", in_flight);
    // Every permit back means every connection task has finished.
    let _drained = permits.acquire_many(all_permits).await;
    info!("All connections closed");
    Ok(())
}
