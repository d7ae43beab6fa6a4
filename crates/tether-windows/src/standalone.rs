use crate::{WindowsProcessHandle, WindowsProcessManager};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Executor, SpawnRequest, Spawned, Teardown, TetherConfig, TetherError};
use tokio::process::Command;
use tracing::{debug, info};

/// Executor spawning processes directly on this host.
///
/// Redirected processes receive the bridge socket as their standard handles. Windows has
/// no tracer restriction to relax, so `tracable` only affects logging.
#[derive(Clone)]
pub struct Standalone {
    manager: Arc<WindowsProcessManager>,
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
            manager: Arc::new(WindowsProcessManager::new()),
            grace: config.grace_period(),
        }
    }

    async fn spawn(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        let (program, args) = request.program()?;
        let mut cmd = Command::new(program);
        cmd.args(args).envs(&request.env);

        let stdio = || -> Result<Stdio, TetherError> {
            match request.redirect {
                Some(endpoint) => endpoint.to_stdio().map_err(TetherError::platform),
                None => Ok(Stdio::inherit()),
            }
        };

        if request.interactive || request.redirect.is_some() {
            cmd.stdin(stdio()?);
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.stdout(stdio()?).stderr(stdio()?);
        cmd.kill_on_drop(!request.wait);

        if request.tracable {
            debug!(command = ?request.command, "Tracing needs no extra permission on Windows");
        }

        let child = cmd
            .spawn()
            .map_err(|e| TetherError::spawn_failed(&request.command, e))?;
        drop(cmd);

        info!(
            pid = ?child.id(),
            command = ?request.command,
            redirected = request.redirect.is_some(),
            "Spawned Windows process"
        );

        let teardown = if request.wait {
            Teardown::Wait
        } else {
            Teardown::Terminate { grace: self.grace }
        };

        Ok(Spawned::new(
            Box::new(WindowsProcessHandle::new(child, request.command)),
            self.manager.clone(),
            teardown,
        ))
    }
}

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
    use crate::LoopbackBridge;
    use tether_core::{Bridge, BufferedChannel};

    #[tokio::test]
    async fn test_missing_program_is_spawn_failed() {
        let err = Standalone::default()
            .local(SpawnRequest::new(["tether-no-such-program.exe"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_redirected_output_reaches_controller() {
        let config = TetherConfig::default();
        let pair = LoopbackBridge::default().bridge().unwrap();
        let mut child = pair.child;

        let spawned = Standalone::new(&config)
            .remote(
                SpawnRequest::new(["cmd.exe", "/c", "echo ready"])
                    .redirect(Some(&child))
                    .wait(true),
            )
            .await
            .unwrap();
        child.close();

        let mut channel = BufferedChannel::from_endpoint(pair.controller, &config).unwrap();
        let line = channel
            .receive_line(Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(line, b"ready\r\n");
        spawned.close().await.unwrap();
    }
}
