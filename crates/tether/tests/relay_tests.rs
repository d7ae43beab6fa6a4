#![cfg(unix)]

use std::time::Duration;
use tether::monitor::{Verbosity, monitor};
use tether::{BufferedChannel, PlatformBridge, RetryConfig, TetherConfig, tcp};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

/// Line-oriented service answering every line in upper case
async fn shouting_service() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            writer
                .write_all(format!("{}\n", line.to_uppercase()).as_bytes())
                .await
                .unwrap();
        }
    });

    port
}

#[tokio::test]
async fn test_monitor_relays_tcp_service() {
    let port = shouting_service().await;
    let stream = tcp::connect("127.0.0.1", port, &RetryConfig::default())
        .await
        .unwrap();

    let (controller, guard) = monitor(stream, Verbosity::Hex, &PlatformBridge::default()).unwrap();
    let mut channel = BufferedChannel::from_endpoint(controller, &TetherConfig::default()).unwrap();

    channel.send_line(b"hello").await.unwrap();
    assert_eq!(channel.receive_line(TIMEOUT).await.unwrap(), b"HELLO\n");

    channel.send_line(b"again").await.unwrap();
    assert_eq!(channel.receive_line(TIMEOUT).await.unwrap(), b"AGAIN\n");

    guard.close().await;
}
