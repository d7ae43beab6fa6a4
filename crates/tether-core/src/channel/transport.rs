use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Raw duplex byte stream underneath a [`BufferedChannel`](super::BufferedChannel).
#[async_trait]
pub trait Transport: Send {
    /// Write a prefix of `data`, returning how many bytes were accepted
    async fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read one chunk.
    ///
    /// * `Some(Duration::ZERO)` never waits and fails with `WouldBlock` when nothing is ready.
    /// * `Some(d)` waits at most `d` and fails with `TimedOut` when it elapses.
    /// * `None` waits indefinitely.
    ///
    /// An empty chunk means end of stream.
    async fn recv(&mut self, timeout: Option<Duration>) -> io::Result<Vec<u8>>;

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Close the write direction so the peer sees end of stream
    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Transport whose read side is drained continuously by a background task into a queue.
///
/// Reads are served from the queue, which gives exact zero-wait and bounded-wait
/// semantics independent of how the underlying stream reports readiness. The queue holds
/// at most `queue_depth` chunks; once it is full the task stops reading, so an unread
/// channel throttles the peer. The task stops at end of stream, on a read error, or when
/// the transport is dropped.
pub struct QueuedTransport {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    queue: mpsc::Receiver<io::Result<Vec<u8>>>,
    cancellation_token: CancellationToken,
    delivery: Option<JoinHandle<()>>,
}

impl QueuedTransport {
    /// Split `stream` and start the delivery task on the current runtime
    pub fn new<S>(stream: S, chunk_size: usize, queue_depth: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, queue) = mpsc::channel(queue_depth.max(1));
        let cancellation_token = CancellationToken::new();
        let delivery = tokio::spawn(deliver(
            reader,
            tx,
            chunk_size.max(1),
            cancellation_token.clone(),
        ));

        Self {
            writer: Box::new(writer),
            queue,
            cancellation_token,
            delivery: Some(delivery),
        }
    }
}

async fn deliver<R: AsyncRead + Unpin>(
    mut reader: R,
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
    chunk_size: usize,
    cancellation_token: CancellationToken,
) {
    let mut buf = vec![0u8; chunk_size];

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                debug!("Delivery task cancelled");
                break;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("Delivery task reached end of stream");
                    let _ = tx.send(Ok(Vec::new())).await;
                    break;
                }
                Ok(n) => {
                    if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Delivery task read failed");
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for QueuedTransport {
    async fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writer.write(data).await
    }

    async fn recv(&mut self, timeout: Option<Duration>) -> io::Result<Vec<u8>> {
        match timeout {
            Some(timeout) if timeout.is_zero() => match self.queue.try_recv() {
                Ok(item) => item,
                Err(TryRecvError::Empty) => Err(io::ErrorKind::WouldBlock.into()),
                Err(TryRecvError::Disconnected) => Ok(Vec::new()),
            },
            Some(timeout) => match tokio::time::timeout(timeout, self.queue.recv()).await {
                Ok(Some(item)) => item,
                Ok(None) => Ok(Vec::new()),
                Err(_) => Err(io::ErrorKind::TimedOut.into()),
            },
            None => self.queue.recv().await.unwrap_or_else(|| Ok(Vec::new())),
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

impl Drop for QueuedTransport {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        if let Some(delivery) = self.delivery.take() {
            delivery.abort();
        }
    }
}
