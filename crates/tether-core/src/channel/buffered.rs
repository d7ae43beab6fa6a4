use super::transport::{QueuedTransport, Transport};
use crate::config::TetherConfig;
use crate::endpoint::Endpoint;
use crate::error::TetherError;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::bytes::BytesMut;
use tracing::{debug, info};

/// Buffered reader/writer over a [`Transport`].
///
/// Timeouts follow one convention throughout:
/// * `Some(Duration::ZERO)` never waits,
/// * `Some(d)` waits at most `d` for fresh data,
/// * `None` waits indefinitely.
///
/// Bytes are only removed from the buffer when they are handed to a caller, so any
/// `receive*` call that fails or is cancelled can simply be retried.
pub struct BufferedChannel<T: Transport = QueuedTransport> {
    transport: T,
    pending: BytesMut,
    eof: bool,
}

impl BufferedChannel<QueuedTransport> {
    /// Wrap the controller side of a bridge
    pub fn from_endpoint(endpoint: Endpoint, config: &TetherConfig) -> Result<Self, TetherError> {
        let stream = endpoint.into_stream().map_err(TetherError::platform)?;
        Ok(Self::new(QueuedTransport::new(
            stream,
            config.read_chunk_size,
            config.read_queue_depth,
        )))
    }
}

impl<T: Transport> BufferedChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pending: BytesMut::new(),
            eof: false,
        }
    }

    /// Number of bytes read from the transport but not yet handed out
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Write all of `data`, retrying partial writes with the remainder
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TetherError> {
        let mut rest = data;

        while !rest.is_empty() {
            let n = self
                .transport
                .send(rest)
                .await
                .map_err(TetherError::platform)?;
            if n == 0 {
                return Err(TetherError::platform(io::ErrorKind::WriteZero.into()));
            }
            rest = &rest[n..];
        }

        self.transport.flush().await.map_err(TetherError::platform)
    }

    pub async fn send_line(&mut self, data: &[u8]) -> Result<(), TetherError> {
        let mut line = Vec::with_capacity(data.len() + 1);
        line.extend_from_slice(data);
        line.push(b'\n');
        self.send(&line).await
    }

    /// Close the write direction; the peer observes end of stream
    pub async fn shutdown(&mut self) -> Result<(), TetherError> {
        self.transport.shutdown().await.map_err(TetherError::platform)
    }

    /// Move every chunk that is ready right now into the buffer.
    /// Returns whether anything was added.
    async fn drain(&mut self) -> Result<bool, TetherError> {
        let mut added = false;

        while !self.eof {
            match self.transport.recv(Some(Duration::ZERO)).await {
                Ok(chunk) if chunk.is_empty() => {
                    debug!(pending = self.pending.len(), "Channel reached end of stream");
                    self.eof = true;
                }
                Ok(chunk) => {
                    debug!(bytes = chunk.len(), "Drained chunk");
                    self.pending.extend_from_slice(&chunk);
                    added = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(self.map_read_error(e, Some(Duration::ZERO))),
            }
        }

        Ok(added)
    }

    /// One read that may wait up to `timeout`
    async fn wait_for_chunk(&mut self, timeout: Option<Duration>) -> Result<(), TetherError> {
        match self.transport.recv(timeout).await {
            Ok(chunk) if chunk.is_empty() => {
                debug!(pending = self.pending.len(), "Channel reached end of stream");
                self.eof = true;
                Ok(())
            }
            Ok(chunk) => {
                debug!(bytes = chunk.len(), "Received chunk");
                self.pending.extend_from_slice(&chunk);
                Ok(())
            }
            Err(e) => Err(self.map_read_error(e, timeout)),
        }
    }

    fn map_read_error(&self, error: io::Error, timeout: Option<Duration>) -> TetherError {
        match error.kind() {
            io::ErrorKind::WouldBlock => TetherError::WouldBlock,
            io::ErrorKind::TimedOut => TetherError::Timeout(timeout.unwrap_or_default()),
            _ => TetherError::platform(error),
        }
    }

    /// Return up to `size` bytes (everything buffered when `None`).
    ///
    /// Whatever is immediately available is drained first. Only when nothing is buffered
    /// afterwards does the call wait, once, for at most `timeout`. With a zero timeout
    /// and no data the call fails with [`TetherError::WouldBlock`] instead of returning
    /// an empty result, unless `size` is `Some(0)`. At end of stream the remaining bytes
    /// are returned and, once exhausted, every call returns an empty vector.
    pub async fn receive(
        &mut self,
        size: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TetherError> {
        if !self.eof {
            self.drain().await?;
        }

        let waits = !matches!(timeout, Some(t) if t.is_zero());
        if !self.eof && waits && self.pending.is_empty() && size != Some(0) {
            self.wait_for_chunk(timeout).await?;
        }

        let take = size.unwrap_or(self.pending.len()).min(self.pending.len());
        let data = self.pending.split_to(take);

        if data.is_empty() && !self.eof && size != Some(0) {
            return Err(TetherError::WouldBlock);
        }

        Ok(data.to_vec())
    }

    /// Accumulate until `condition` reports a cut position, then return the bytes before
    /// it. Bytes past the cut stay buffered for the next call.
    ///
    /// `timeout` bounds each wait for fresh data. On timeout, `WouldBlock` or any other
    /// failure, nothing already received is lost. Reaching end of stream before the
    /// condition holds fails with [`TetherError::EndOfStream`], leaving the unmatched
    /// bytes buffered.
    pub async fn receive_until_condition<F>(
        &mut self,
        mut condition: F,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TetherError>
    where
        F: FnMut(&[u8]) -> Option<usize> + Send,
    {
        loop {
            if let Some(pos) = condition(&self.pending) {
                let cut = pos.min(self.pending.len());
                return Ok(self.pending.split_to(cut).to_vec());
            }

            if self.eof {
                return Err(TetherError::EndOfStream);
            }

            self.fill(timeout).await?;
        }
    }

    /// Add at least one chunk (or observe end of stream)
    async fn fill(&mut self, timeout: Option<Duration>) -> Result<(), TetherError> {
        if self.drain().await? || self.eof {
            return Ok(());
        }

        match timeout {
            Some(t) if t.is_zero() => Err(TetherError::WouldBlock),
            _ => self.wait_for_chunk(timeout).await,
        }
    }

    /// Bytes up to and including the first occurrence of `delimiter`
    pub async fn receive_until(
        &mut self,
        delimiter: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TetherError> {
        self.receive_until_condition(|data| find(data, delimiter), timeout)
            .await
    }

    /// Exactly `n` bytes
    pub async fn receive_exact(
        &mut self,
        n: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TetherError> {
        self.receive_until_condition(|data| (data.len() >= n).then_some(n), timeout)
            .await
    }

    pub async fn receive_line(&mut self, timeout: Option<Duration>) -> Result<Vec<u8>, TetherError> {
        self.receive_until(b"\n", timeout).await
    }

    pub async fn send_after(
        &mut self,
        delimiter: &[u8],
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), TetherError> {
        self.receive_until(delimiter, timeout).await?;
        self.send(data).await
    }

    pub async fn send_line_after(
        &mut self,
        delimiter: &[u8],
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), TetherError> {
        self.receive_until(delimiter, timeout).await?;
        self.send_line(data).await
    }

    /// Forward every line of `input` with [`send_line`](Self::send_line) until the input
    /// ends or Ctrl-C is pressed
    pub async fn interactive<R>(&mut self, input: R) -> Result<(), TetherError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        self.forward_lines(input, tokio::signal::ctrl_c()).await
    }

    /// Forward lines until `input` ends or `interrupt` resolves. `interrupt` is polled for
    /// the whole session, so one that fires while a line is being sent ends the loop
    /// before the next line.
    async fn forward_lines<R, I>(&mut self, input: R, interrupt: I) -> Result<(), TetherError>
    where
        R: AsyncBufRead + Unpin + Send,
        I: Future<Output = io::Result<()>>,
    {
        let mut lines = input.lines();
        tokio::pin!(interrupt);
        info!("Entering interactive mode");

        loop {
            tokio::select! {
                biased;

                _ = &mut interrupt => {
                    info!("Interrupted, leaving interactive mode");
                    return Ok(());
                }
                line = lines.next_line() => match line? {
                    Some(line) => self.send_line(line.as_bytes()).await?,
                    None => {
                        debug!("Interactive input closed");
                        return Ok(());
                    }
                }
            }
        }
    }

    pub async fn interactive_stdin(&mut self) -> Result<(), TetherError> {
        self.interactive(tokio::io::BufReader::new(tokio::io::stdin()))
            .await
    }
}

/// Position just past the first occurrence of `needle`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + needle.len())
}
