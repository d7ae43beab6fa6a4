use crate::UnixProcessHandle;
use crate::UnixProcessManager;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Executor, SpawnRequest, Spawned, Teardown, TetherConfig, TetherError};
use tokio::process::Command;
use tracing::info;

/// Executor spawning processes directly on this host.
///
/// `local` and `remote` are the same environment. Every process is placed in its own
/// process group so terminal signals aimed at the controller do not reach it.
#[derive(Clone)]
pub struct Standalone {
    manager: Arc<UnixProcessManager>,
    grace: Duration,
}

impl Default for Standalone {
    fn default() -> Self {
        Self::new(&TetherConfig::default())
    }
}

impl Standalone {
    pub fn new(config: &TetherConfig) -> Self {
        Self {
            manager: Arc::new(UnixProcessManager::new()),
            grace: config.grace_period(),
        }
    }

    fn command(&self, request: &SpawnRequest<'_>) -> Result<Command, TetherError> {
        let (program, args) = request.program()?;
        let mut cmd = Command::new(program);
        cmd.args(args).envs(&request.env).process_group(0);

        let stdio = || -> Result<Stdio, TetherError> {
            match request.redirect {
                Some(endpoint) => endpoint.to_stdio().map_err(TetherError::platform),
                None => Ok(Stdio::inherit()),
            }
        };

        // Non-interactive processes never read the controller's terminal
        if request.interactive {
            cmd.stdin(stdio()?);
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.stdout(stdio()?).stderr(stdio()?);

        if request.tracable {
            allow_any_tracer(&mut cmd);
        }

        // Fallback for a `Spawned` dropped without `close`
        cmd.kill_on_drop(!request.wait);
        Ok(cmd)
    }

    async fn spawn(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        let mut cmd = self.command(&request)?;
        let child = cmd
            .spawn()
            .map_err(|e| TetherError::spawn_failed(&request.command, e))?;

        info!(
            pid = ?child.id(),
            command = ?request.command,
            redirected = request.redirect.is_some(),
            tracable = request.tracable,
            "Spawned process"
        );

        let teardown = if request.wait {
            Teardown::Wait
        } else {
            Teardown::Terminate { grace: self.grace }
        };

        Ok(Spawned::new(
            Box::new(UnixProcessHandle::new(child, request.command)),
            self.manager.clone(),
            teardown,
        ))
    }
}

/// Let any process ptrace the child, regardless of Yama's ancestry restriction
#[cfg(target_os = "linux")]
fn allow_any_tracer(cmd: &mut Command) {
    // SAFETY: the closure runs between fork and exec and only issues prctl, which is
    // async-signal-safe and touches no memory shared with the parent.
    unsafe {
        cmd.pre_exec(|| {
            // Fails with EINVAL when Yama is not enabled, in which case nothing needs relaxing
            libc::prctl(libc::PR_SET_PTRACER, libc::PR_SET_PTRACER_ANY, 0, 0, 0);
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
fn allow_any_tracer(_cmd: &mut Command) {}

#[async_trait]
impl Executor for Standalone {
    async fn local(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.spawn(request).await
    }

    async fn remote(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.spawn(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SocketPairBridge;
    use tether_core::{Bridge, BufferedChannel};

    fn config() -> TetherConfig {
        TetherConfig::builder()
            .grace_period_ms(200u64)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failed() {
        let executor = Standalone::default();
        let err = executor
            .local(SpawnRequest::new(["/nonexistent/tether-test-binary"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::SpawnFailed { .. }));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_empty_command_is_spawn_failed() {
        let executor = Standalone::default();
        let err = executor
            .remote(SpawnRequest::new(Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_close_terminates_running_process() {
        let executor = Standalone::new(&config());
        let mut spawned = executor
            .local(SpawnRequest::new(["sleep", "30"]))
            .await
            .unwrap();
        assert!(spawned.pid().is_some());
        assert!(spawned.is_running().await);

        let pid = spawned.pid().unwrap();
        spawned.close().await.unwrap();
        assert!(nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid.0 as i32), None).is_err());
    }

    #[tokio::test]
    async fn test_wait_leaves_process_to_finish() {
        let executor = Standalone::new(&config());
        let spawned = executor
            .local(SpawnRequest::new(["sh", "-c", "sleep 0.3"]).wait(true))
            .await
            .unwrap();
        assert_eq!(spawned.teardown(), Teardown::Wait);

        let started = std::time::Instant::now();
        spawned.close().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_redirect_binds_standard_streams() {
        let executor = Standalone::new(&config());
        let pair = SocketPairBridge.bridge().unwrap();
        let mut child = pair.child;

        let spawned = executor
            .remote(
                SpawnRequest::new(["sh", "-c", "read line; echo \"got $line\"; echo \"$GREETING\""])
                    .redirect(Some(&child))
                    .interactive(true)
                    .env("GREETING", "hello"),
            )
            .await
            .unwrap();
        child.close();

        let mut channel = BufferedChannel::from_endpoint(pair.controller, &config()).unwrap();
        let wait = Some(Duration::from_secs(5));
        channel.send_line(b"ping").await.unwrap();
        assert_eq!(channel.receive_line(wait).await.unwrap(), b"got ping\n");
        assert_eq!(channel.receive_line(wait).await.unwrap(), b"hello\n");

        let err = channel.receive_line(wait).await.unwrap_err();
        assert!(matches!(err, TetherError::EndOfStream));
        spawned.close().await.unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_tracable_process_still_runs() {
        let executor = Standalone::new(&config());
        let mut spawned = executor
            .local(SpawnRequest::new(["sh", "-c", "exit 3"]).tracable(true).wait(true))
            .await
            .unwrap();

        match spawned.wait().await.unwrap() {
            tether_core::ProcessStatus::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected status: {other:?}"),
        }
    }
}
