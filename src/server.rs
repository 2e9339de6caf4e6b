//! TCP accept loop.

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::StorageEngine;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::error;

/// Pause after a failed accept before trying again
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections forever, serving each one on its own task.
///
/// Accept failures (for example running out of file descriptors) are logged
/// and the loop retries after [`ACCEPT_BACKOFF`]. Stop it by dropping the future.
pub async fn accept_loop(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(&storage));
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => backoff_after_accept_error(&e).await,
        }
    }
}

/// Logs an accept failure and waits before the next attempt.
///
/// Errors such as EMFILE persist until some connection closes, so retrying
/// at once would spin.
async fn backoff_after_accept_error(e: &io::Error) {
    error!(
        error = %e,
        retry_ms = ACCEPT_BACKOFF.as_millis() as u64,
        "Failed to accept connection"
    );
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}
