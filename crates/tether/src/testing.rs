//! Executor double recording every request it receives

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_core::{
    Executor, ProcessHandle, ProcessId, ProcessStatus, ProcessTermination, SpawnRequest, Spawned,
    Teardown, TerminationResult, TetherError,
};

/// What a spawn request looked like when it reached the innermost executor
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub remote: bool,
    pub command: Vec<String>,
    pub redirected: bool,
    pub interactive: bool,
    pub tracable: bool,
    pub wait: bool,
}

#[derive(Default)]
pub struct RecordingExecutor {
    pub requests: Arc<Mutex<Vec<Recorded>>>,
    pub stopped: Arc<Mutex<Vec<Vec<String>>>>,
    next_pid: AtomicU32,
}

impl RecordingExecutor {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<Vec<String>> {
        self.stopped.lock().unwrap().clone()
    }

    fn record(&self, remote: bool, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        request.program()?;
        self.requests.lock().unwrap().push(Recorded {
            remote,
            command: request.command.clone(),
            redirected: request.redirect.is_some(),
            interactive: request.interactive,
            tracable: request.tracable,
            wait: request.wait,
        });

        let teardown = if request.wait {
            Teardown::Wait
        } else {
            Teardown::Terminate {
                grace: Duration::from_millis(10),
            }
        };
        Ok(Spawned::new(
            Box::new(Dummy {
                pid: ProcessId(1000 + self.next_pid.fetch_add(1, Ordering::SeqCst)),
                command: request.command,
                stopped: self.stopped.clone(),
                alive: true,
            }),
            Arc::new(Polite),
            teardown,
        ))
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn local(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.record(false, request)
    }

    async fn remote(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.record(true, request)
    }
}

struct Dummy {
    pid: ProcessId,
    command: Vec<String>,
    stopped: Arc<Mutex<Vec<Vec<String>>>>,
    alive: bool,
}

#[async_trait]
impl ProcessHandle for Dummy {
    fn get_pid(&self) -> Option<ProcessId> {
        Some(self.pid)
    }

    fn get_command(&self) -> &[String] {
        &self.command
    }

    async fn is_running(&mut self) -> bool {
        self.alive
    }

    async fn try_wait(&mut self) -> anyhow::Result<Option<ProcessStatus>> {
        Ok((!self.alive).then_some(ProcessStatus::Terminated))
    }

    async fn wait(&mut self) -> anyhow::Result<ProcessStatus> {
        self.alive = false;
        Ok(ProcessStatus::Terminated)
    }

    async fn kill(&mut self) -> anyhow::Result<()> {
        if self.alive {
            self.alive = false;
            self.stopped.lock().unwrap().push(self.command.clone());
        }
        Ok(())
    }
}

struct Polite;

#[async_trait]
impl ProcessTermination for Polite {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        match handle.kill().await {
            Ok(()) => TerminationResult::Success,
            Err(e) => TerminationResult::Failed(e.to_string()),
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        self.terminate_gracefully(handle).await
    }
}

/// Borrow a list of string literals as an owned argument vector
pub fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
