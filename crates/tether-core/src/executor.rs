use crate::endpoint::Endpoint;
use crate::error::TetherError;
use crate::process::{ProcessHandle, ProcessId, ProcessStatus, ProcessTermination, TerminationResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A single spawn request: argument vector plus the options every executor honours.
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub command: Vec<String>,
    /// Endpoint bound as the process's standard streams
    pub redirect: Option<&'a Endpoint>,
    pub interactive: bool,
    /// Let any process attach a debugger, and report the real target pid
    pub tracable: bool,
    /// Leave the process running on teardown instead of terminating it
    pub wait: bool,
    /// Merged over the inherited environment
    pub env: HashMap<String, String>,
}

impl<'a> SpawnRequest<'a> {
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(command: I) -> Self {
        Self {
            command: command.into_iter().map(|s| s.to_string()).collect(),
            redirect: None,
            interactive: false,
            tracable: false,
            wait: false,
            env: HashMap::new(),
        }
    }

    pub fn redirect(mut self, redirect: Option<&'a Endpoint>) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn tracable(mut self, tracable: bool) -> Self {
        self.tracable = tracable;
        self
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn env<T: ToString>(mut self, key: T, value: T) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(mut self, iter: I) -> Self {
        for (key, value) in iter {
            self.env.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Split into program and arguments, rejecting an empty argument vector
    pub fn program(&self) -> Result<(&str, &[String]), TetherError> {
        match self.command.split_first() {
            Some((program, args)) => Ok((program.as_str(), args)),
            None => Err(TetherError::spawn_failed(
                &self.command,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            )),
        }
    }
}

/// Capability to spawn processes, either on the controller's host (`local`) or in the
/// target environment (`remote`).
///
/// Wrapping executors (containers, multiplexers, command prefixes) implement this trait by
/// rewriting the request and delegating to the executor they wrap, so any number of them
/// can be stacked.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn local(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError>;

    async fn remote(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError>;
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for Arc<E> {
    async fn local(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        (**self).local(request).await
    }

    async fn remote(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        (**self).remote(request).await
    }
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for Box<E> {
    async fn local(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        (**self).local(request).await
    }

    async fn remote(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        (**self).remote(request).await
    }
}

/// What happens to a spawned process when its scope is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Wait for the process to exit on its own
    Wait,
    /// Terminate gracefully, force kill once the grace window elapses
    Terminate { grace: Duration },
}

/// A process spawned by an executor, owned by the caller until `close`.
///
/// Dropping without `close` falls back to the kill-on-drop set at spawn time.
pub struct Spawned {
    pid: Option<ProcessId>,
    handle: Option<Box<dyn ProcessHandle>>,
    terminator: Arc<dyn ProcessTermination>,
    teardown: Teardown,
}

impl std::fmt::Debug for Spawned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawned")
            .field("pid", &self.pid)
            .field("command", &self.command())
            .field("teardown", &self.teardown)
            .finish()
    }
}

impl Spawned {
    pub fn new(
        handle: Box<dyn ProcessHandle>,
        terminator: Arc<dyn ProcessTermination>,
        teardown: Teardown,
    ) -> Self {
        Self {
            pid: handle.get_pid(),
            handle: Some(handle),
            terminator,
            teardown,
        }
    }

    /// Process id reported to the caller, `None` when it cannot be obtained
    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    /// Override the reported pid, used when the spawned process is only a trampoline
    /// for the real target
    pub fn with_reported_pid(mut self, pid: Option<ProcessId>) -> Self {
        self.pid = pid;
        self
    }

    pub fn teardown(&self) -> Teardown {
        self.teardown
    }

    pub fn command(&self) -> &[String] {
        self.handle.as_ref().map(|h| h.get_command()).unwrap_or(&[])
    }

    /// Whether the spawned process itself is still alive
    pub async fn is_running(&mut self) -> bool {
        match self.handle.as_mut() {
            Some(handle) => handle.is_running().await,
            None => false,
        }
    }

    /// Wait for the spawned process to exit without terminating it
    pub async fn wait(&mut self) -> Result<ProcessStatus, TetherError> {
        match self.handle.as_mut() {
            Some(handle) => Ok(handle.wait().await?),
            None => Err(TetherError::ProcessError("process already closed".to_string())),
        }
    }

    /// Tear the process down according to its policy
    pub async fn close(mut self) -> Result<(), TetherError> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match self.teardown {
            Teardown::Wait => {
                let status = handle.wait().await?;
                info!(command = ?handle.get_command(), status = ?status, "Process exited");
                Ok(())
            }
            Teardown::Terminate { grace } => {
                if handle.try_wait().await?.is_some() {
                    return Ok(());
                }

                match self
                    .terminator
                    .terminate_with_grace(handle.as_mut(), grace)
                    .await
                {
                    TerminationResult::Success | TerminationResult::ProcessNotFound => Ok(()),
                    other => {
                        warn!(command = ?handle.get_command(), result = ?other, "Failed to terminate process");
                        Err(TetherError::ProcessError(format!(
                            "failed to terminate {:?}: {other:?}",
                            handle.get_command()
                        )))
                    }
                }
            }
        }
    }
}

impl Drop for Spawned {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.as_ref() {
            if self.teardown != Teardown::Wait {
                warn!(
                    pid = ?handle.get_pid(),
                    command = ?handle.get_command(),
                    "Spawned process dropped without close - relying on kill on drop"
                );
            }
        }
    }
}
