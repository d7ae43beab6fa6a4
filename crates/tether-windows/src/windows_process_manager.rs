use anyhow::Result;
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use tether_core::*;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
    pid: Option<ProcessId>,
    command: Vec<String>,
}

impl WindowsProcessHandle {
    pub fn new(child: Child, command: Vec<String>) -> Self {
        Self {
            pid: child.id().map(ProcessId::from),
            child,
            command,
        }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.pid
    }

    fn get_command(&self) -> &[String] {
        &self.command
    }

    async fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => {
                info!(pid = ?self.pid, "Windows process is no longer running");
                false
            }
            Err(e) => {
                warn!(pid = ?self.pid, error = %e, "Failed to query Windows process state");
                false
            }
        }
    }

    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
        match self.child.try_wait()? {
            Some(status) => Ok(Some(ProcessStatus::Exited(status))),
            None => Ok(None),
        }
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        let status = self.child.wait().await?;
        Ok(ProcessStatus::Exited(status))
    }

    async fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
    }
}

/// taskkill based termination. A force kill takes the whole process tree down.
#[derive(Debug, Default)]
pub struct WindowsProcessManager;

impl WindowsProcessManager {
    pub fn new() -> Self {
        Self
    }

    /// Use taskkill to terminate a single process
    async fn taskkill(&self, pid: u32, force: bool) -> Result<bool> {
        let pid_string = pid.to_string();
        let mut args = vec!["/PID", &pid_string];
        if force {
            args.push("/F");
        }

        let output = Command::new("taskkill").args(&args).output().await?;

        Ok(output.status.success())
    }

    /// Use taskkill with /T to terminate a process tree
    async fn taskkill_tree(&self, pid: u32) -> Result<bool> {
        let output = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await?;

        Ok(output.status.success())
    }
}

#[async_trait]
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match self.taskkill(pid.0, false).await {
            Ok(true) => {
                info!(pid = %pid, "Sent graceful termination to process");
                TerminationResult::Success
            }
            Ok(false) => {
                // Console programs without a window refuse a polite taskkill
                if handle.try_wait().await.ok().flatten().is_some() {
                    TerminationResult::ProcessNotFound
                } else {
                    TerminationResult::Failed("process ignored graceful termination".to_string())
                }
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to gracefully terminate process");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
            }
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match self.taskkill_tree(pid.0).await {
            Ok(true) => info!(pid = %pid, "Force killed process tree"),
            Ok(false) => info!(pid = %pid, "taskkill could not kill process tree"),
            Err(e) => warn!(pid = %pid, error = %e, "Failed to run taskkill"),
        }

        // Also covers a taskkill failure; kill on an exited child is a no-op
        match handle.kill().await {
            Ok(()) => TerminationResult::Success,
            Err(e) => {
                warn!(pid = %pid, error = %e, "Handle kill failed");
                TerminationResult::Failed(format!("Force kill failed: {e}"))
            }
        }
    }
}
