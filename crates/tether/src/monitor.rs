//! Traffic relay between an external connection and a bridged target.
//!
//! `monitor` sits between a connection the controller already has (typically a TCP
//! stream to a remote service) and a fresh bridge whose controller side it hands back.
//! Everything crossing the relay is echoed to stderr as raw bytes or as a hexdump.

use std::fmt::Write as _;
use std::io::IsTerminal;
use tether_core::{Bridge, Endpoint, TetherError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHUNK: usize = 0x1000;

/// Header of chunks flowing from the controller to the external side
const OUTBOUND: &str = "  >";
/// Header of chunks flowing from the external side to the controller
const INBOUND: &str = "    <";

const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const END: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    /// Copy the bytes themselves
    #[default]
    Raw,
    Hex,
}

/// Render `data` as 16-byte hexdump lines, each prefixed by `header`, preceded by a
/// border line. Empty input renders as nothing.
pub fn hexdump(data: &[u8], header: &str, color: bool) -> String {
    if data.is_empty() {
        return String::new();
    }

    let paint = |code: &'static str| if color { code } else { "" };
    let mut text = format!("{header} {}\n", "-".repeat(56));

    for (index, line) in data.chunks(16).enumerate() {
        let (left, right) = line.split_at(line.len().min(8));
        let _ = writeln!(
            text,
            "{header} {}[{:03x}]{} {} {} {}",
            paint(CYAN),
            index * 16,
            paint(END),
            quad(left, color),
            quad(right, color),
            printable(line),
        );
    }

    text
}

fn quad(bytes: &[u8], color: bool) -> String {
    let mut text = String::new();
    for i in 0..8 {
        match bytes.get(i).copied() {
            Some(b) if color && matches!(b, 0x0a | 0x55 | 0x7f | 0xff) => {
                let _ = write!(text, "{GREEN}{b:02x}{END}");
            }
            Some(b) => {
                let _ = write!(text, "{b:02x}");
            }
            None => text.push_str("  "),
        }
    }
    text
}

fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (b' '..=b'~').contains(&b) { b as char } else { '.' })
        .collect()
}

/// Handle to a running relay. Dropping it stops the relay without waiting.
pub struct MonitorGuard {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorGuard {
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Wait for the relay to end on its own, after either side reached end-of-stream
    pub async fn finished(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Relay task failed");
            }
        }
    }

    /// Stop the relay and wait for it
    pub async fn close(mut self) {
        self.token.cancel();
        self.finished().await;
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Relay between `external` and a new bridge, echoing traffic to stderr.
///
/// Returns the controller side of the bridge; bytes written to it reach `external` and
/// bytes arriving on `external` can be read from it. Must be called within a tokio
/// runtime.
pub fn monitor<S>(
    external: S,
    verbosity: Verbosity,
    bridge: &dyn Bridge,
) -> Result<(Endpoint, MonitorGuard), TetherError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let color = std::io::stderr().is_terminal();
    monitor_with_sink(external, verbosity, bridge, tokio::io::stderr(), color)
}

/// `monitor` echoing to `sink` instead of stderr
pub fn monitor_with_sink<S, W>(
    external: S,
    verbosity: Verbosity,
    bridge: &dyn Bridge,
    sink: W,
    color: bool,
) -> Result<(Endpoint, MonitorGuard), TetherError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let pair = bridge.bridge()?;
    let internal = pair.child.into_stream().map_err(TetherError::platform)?;

    let token = CancellationToken::new();
    let relay = Relay {
        verbosity,
        color,
        sink,
    };
    let task = tokio::spawn(relay.run(external, internal, token.clone()));

    info!(verbosity = ?verbosity, "Relay started");
    Ok((
        pair.controller,
        MonitorGuard {
            token,
            task: Some(task),
        },
    ))
}

struct Relay<W> {
    verbosity: Verbosity,
    color: bool,
    sink: W,
}

impl<W: AsyncWrite + Unpin + Send> Relay<W> {
    async fn run<S, I>(mut self, external: S, internal: I, token: CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Send,
        I: AsyncRead + AsyncWrite + Send,
    {
        let (mut external_rx, mut external_tx) = tokio::io::split(external);
        let (mut internal_rx, mut internal_tx) = tokio::io::split(internal);
        let mut outbound = vec![0u8; CHUNK];
        let mut inbound = vec![0u8; CHUNK];

        let result: std::io::Result<()> = async {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Relay cancelled");
                        return Ok(());
                    }
                    read = internal_rx.read(&mut outbound) => {
                        let n = read?;
                        if n == 0 {
                            debug!("Controller side closed");
                            return Ok(());
                        }
                        self.echo(&outbound[..n], OUTBOUND).await;
                        external_tx.write_all(&outbound[..n]).await?;
                        external_tx.flush().await?;
                    }
                    read = external_rx.read(&mut inbound) => {
                        let n = read?;
                        if n == 0 {
                            debug!("External side closed");
                            return Ok(());
                        }
                        self.echo(&inbound[..n], INBOUND).await;
                        internal_tx.write_all(&inbound[..n]).await?;
                        internal_tx.flush().await?;
                    }
                }
            }
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "Relay stopped on I/O error");
        }
        let _ = internal_tx.shutdown().await;
        let _ = external_tx.shutdown().await;
        info!("Relay finished");
    }

    async fn echo(&mut self, data: &[u8], header: &str) {
        let dump;
        let bytes = match self.verbosity {
            Verbosity::Quiet => return,
            Verbosity::Raw => data,
            Verbosity::Hex => {
                dump = hexdump(data, header, self.color);
                dump.as_bytes()
            }
        };

        let written = match self.sink.write_all(bytes).await {
            Ok(()) => self.sink.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            debug!(error = %e, "Failed to echo relayed bytes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexdump_layout() {
        let dump = hexdump(b"0123456789abcdef\x00\n", "  >", false);
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("  > {}", "-".repeat(56)));
        assert_eq!(
            lines[1],
            "  > [000] 3031323334353637 3839616263646566 0123456789abcdef"
        );
        assert_eq!(
            lines[2],
            "  > [010] 000a                              .."
        );
    }

    #[test]
    fn test_hexdump_emphasis() {
        let dump = hexdump(b"U\x01", "    <", true);
        let line = dump.lines().nth(1).unwrap();

        assert!(line.starts_with("    < \x1b[36m[000]\x1b[0m "));
        assert!(line.contains("\x1b[32m55\x1b[0m01"));
        assert!(line.ends_with(" U."));
    }

    #[test]
    fn test_hexdump_empty() {
        assert!(hexdump(b"", "  >", true).is_empty());
    }

    #[cfg(unix)]
    mod relay {
        use super::*;
        use crate::PlatformBridge;
        use std::time::Duration;
        use tether_core::{BufferedChannel, TetherConfig};

        #[tokio::test]
        async fn test_relay_forwards_both_ways() {
            let (external, mut remote) = tokio::io::duplex(256);
            let (sink, mut echoed) = tokio::io::duplex(4096);

            let (controller, guard) = monitor_with_sink(
                external,
                Verbosity::Raw,
                &PlatformBridge::default(),
                sink,
                false,
            )
            .unwrap();
            let mut channel =
                BufferedChannel::from_endpoint(controller, &TetherConfig::default()).unwrap();

            channel.send(b"ping\n").await.unwrap();
            let mut buf = [0u8; 5];
            remote.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping\n");

            remote.write_all(b"pong\n").await.unwrap();
            let line = channel
                .receive_line(Some(Duration::from_secs(5)))
                .await
                .unwrap();
            assert_eq!(line, b"pong\n");

            let mut buf = [0u8; 10];
            echoed.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping\npong\n");

            guard.close().await;
        }

        #[tokio::test]
        async fn test_relay_ends_when_external_closes() {
            let (external, remote) = tokio::io::duplex(256);

            let (controller, mut guard) = monitor_with_sink(
                external,
                Verbosity::Quiet,
                &PlatformBridge::default(),
                tokio::io::sink(),
                false,
            )
            .unwrap();
            drop(remote);

            tokio::time::timeout(Duration::from_secs(5), guard.finished())
                .await
                .unwrap();
            assert!(guard.is_finished());

            let mut channel =
                BufferedChannel::from_endpoint(controller, &TetherConfig::default()).unwrap();
            let err = channel
                .receive_line(Some(Duration::from_secs(5)))
                .await
                .unwrap_err();
            assert!(matches!(err, TetherError::EndOfStream));
        }
    }
}
