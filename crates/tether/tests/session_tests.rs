#![cfg(unix)]

use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::sync::Arc;
use std::time::Duration;
use tether::launchers::strace::Tracer;
use tether::launchers::{Program, Runner};
use tether::{
    BufferedChannel, Executor, PlatformStandalone, ProcessId, SessionState, TetherConfig,
    TetherError, launch,
};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

fn alive(pid: ProcessId) -> bool {
    kill(Pid::from_raw(pid.0 as i32), None).is_ok()
}

fn standalone(config: &TetherConfig) -> Arc<dyn Executor> {
    Arc::new(PlatformStandalone::new(config))
}

#[tokio::test]
async fn test_runner_talks_over_bridge() {
    let _ = tether::logging::init(Some("debug"));
    let config = TetherConfig::default();
    let program =
        Program::new(["sh", "-c", "read name; echo \"$GREETING $name\""]).env("GREETING", "hello");
    let runner = Runner::new(program);

    let mut session = launch(&runner, standalone(&config), true, &config)
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Started);

    let connection = session.take_connection().unwrap();
    let mut channel = BufferedChannel::from_endpoint(connection, &config).unwrap();

    channel.send_line(b"tether").await.unwrap();
    let line = channel.receive_line(TIMEOUT).await.unwrap();
    assert_eq!(line, b"hello tether\n");

    // The target exited and the controller holds the only open end
    let err = channel.receive_line(TIMEOUT).await.unwrap_err();
    assert!(matches!(err, TetherError::EndOfStream));
    assert!(channel.is_eof());

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_prompt_driven_exchange() {
    let config = TetherConfig::default();
    let script = "printf 'name? '; read name; printf 'age? '; read age; echo \"$name:$age\"";
    let runner = Runner::new(Program::new(["sh", "-c", script]));

    let mut session = launch(&runner, standalone(&config), true, &config)
        .await
        .unwrap();
    let mut channel =
        BufferedChannel::from_endpoint(session.take_connection().unwrap(), &config).unwrap();

    channel.send_line_after(b"? ", b"alice", TIMEOUT).await.unwrap();
    assert_eq!(channel.receive_until(b"? ", TIMEOUT).await.unwrap(), b"age? ");
    channel.send_line(b"42").await.unwrap();

    assert_eq!(channel.receive_line(TIMEOUT).await.unwrap(), b"alice:42\n");
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_launch_reports_spawn_error() {
    let config = TetherConfig::default();
    let runner = Runner::new(Program::new(["tether-no-such-program"]));

    let err = launch(&runner, standalone(&config), true, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::SpawnFailed { .. }));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_spawning() {
    let config = TetherConfig {
        read_chunk_size: 0,
        ..TetherConfig::default()
    };
    let runner = Runner::new(Program::new(["true"]));

    let err = launch(&runner, standalone(&config), false, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::ConfigurationError(_)));
}

#[tokio::test]
async fn test_tracer_attach_and_teardown() {
    let config = TetherConfig {
        grace_period_ms: 200,
        ..TetherConfig::default()
    };
    // Stand-in for strace that ignores its `-p <pid>` arguments
    let tracer = Tracer::new(Program::new(["sleep", "30"]))
        .strace("sh")
        .options(["-c", "exec sleep 30", "--"]);

    let mut session = launch(&tracer, standalone(&config), false, &config)
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::AttachPending);
    assert_eq!(session.stages().len(), 1);

    let target = session.helper().target_pid();
    assert!(alive(target));

    session.attach().await.unwrap();
    assert_eq!(session.state(), SessionState::Attached);
    assert_eq!(session.stages().len(), 2);

    let pids: Vec<ProcessId> = session.stages().pids().into_iter().flatten().collect();
    assert_eq!(pids.len(), 2);
    assert_eq!(pids[0], target);
    assert!(pids.iter().all(|&pid| alive(pid)));

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(pids.iter().all(|&pid| !alive(pid)));

    // Closing again is a no-op
    session.close().await.unwrap();
}
