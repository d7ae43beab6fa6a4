use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProcessId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(ProcessId)
    }
}

/// Status of a process after termination
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process is currently running
    Running,
    /// Process exited with status information
    Exited(std::process::ExitStatus),
    /// Process was terminated by a signal (Unix) or forcibly terminated (Windows)
    Terminated,
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Process was successfully terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Access denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// Error types for process operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process not found: {0}")]
    ProcessNotFound(ProcessId),
    #[error("Process has already been reaped")]
    AlreadyReaped,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Trait representing a handle to a spawned process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has exited and been reaped)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Get the argument vector that started this process
    fn get_command(&self) -> &[String];

    /// Check if the process is still running (non-blocking)
    async fn is_running(&mut self) -> bool;

    /// Try to get exit status without blocking
    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus>;

    /// Kill the process (platform-specific implementation)
    async fn kill(&mut self) -> Result<()>;
}

/// Trait for process termination strategies
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Ask a single process to exit (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Force kill a process together with its descendants (SIGKILL on Unix)
    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Graceful termination, escalated to a force kill when the process
    /// outlives the grace window
    async fn terminate_with_grace(
        &self,
        handle: &mut dyn ProcessHandle,
        grace: Duration,
    ) -> TerminationResult {
        match self.terminate_gracefully(handle).await {
            TerminationResult::Success => {
                match tokio::time::timeout(grace, handle.wait()).await {
                    Ok(Ok(_)) => TerminationResult::Success,
                    Ok(Err(e)) => TerminationResult::Failed(format!("wait failed: {e}")),
                    Err(_) => {
                        tracing::info!(
                            pid = ?handle.get_pid(),
                            grace = ?grace,
                            "Process outlived grace window, force killing"
                        );
                        self.force_kill(handle).await
                    }
                }
            }
            TerminationResult::ProcessNotFound => TerminationResult::Success,
            _ => {
                // Graceful termination failed, try force kill
                self.force_kill(handle).await
            }
        }
    }
}

/// Implementation of ProcessHandle for boxed trait objects
#[async_trait]
impl ProcessHandle for Box<dyn ProcessHandle> {
    fn get_pid(&self) -> Option<ProcessId> {
        (**self).get_pid()
    }

    fn get_command(&self) -> &[String] {
        (**self).get_command()
    }

    async fn is_running(&mut self) -> bool {
        (**self).is_running().await
    }

    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
        (**self).try_wait().await
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        (**self).wait().await
    }

    async fn kill(&mut self) -> Result<()> {
        (**self).kill().await
    }
}
