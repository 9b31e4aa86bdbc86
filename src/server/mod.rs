//! Coordinator TCP server: wire protocol, connection handling, accept loop.

pub mod handler;
pub mod listener;
pub mod protocol;

pub use handler::handle_connection;
pub use listener::{serve, serve_until};
pub use protocol::{Command, ProtocolError};

use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::context::ServerContext;
use crate::error::DacaResult;

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn run<F>(ctx: Arc<ServerContext>, shutdown: F) -> DacaResult<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(ctx.config.bind_addr()).await?;
    serve_until(ctx, listener, shutdown).await
}
