//! TCP client for targets exposed over the network

use backon::Retryable;
use std::io;
use tether_core::{BufferedChannel, QueuedTransport, RetryConfig, TetherConfig, TetherError};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Whether a failed connect may succeed once the service is up
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
    )
}

/// Connect to `host:port`, retrying while the service refuses connections
pub async fn connect(host: &str, port: u16, retry: &RetryConfig) -> Result<TcpStream, TetherError> {
    let stream = (|| TcpStream::connect((host, port)))
        .retry(retry.backoff())
        .when(is_transient)
        .notify(|e, delay| debug!(host, port, error = %e, delay = ?delay, "Connect failed, retrying"))
        .await?;

    stream.set_nodelay(true)?;
    info!(host, port, peer = ?stream.peer_addr().ok(), "Connected");
    Ok(stream)
}

/// `connect`, wrapped in a buffered channel
pub async fn connect_channel(
    host: &str,
    port: u16,
    config: &TetherConfig,
) -> Result<BufferedChannel, TetherError> {
    let stream = connect(host, port, &config.retry).await?;
    Ok(BufferedChannel::new(QueuedTransport::new(
        stream,
        config.read_chunk_size,
        config.read_queue_depth,
    )))
}
