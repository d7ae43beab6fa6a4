use anyhow::Result;
use async_trait::async_trait;
use tether_core::{ProcessHandle, ProcessId, ProcessStatus, ProcessTermination, TerminationResult};

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::sync::Mutex;
    use sysinfo::System;
    use tokio::process::Child;
    use tracing::{debug, info, warn};

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        pid: Option<ProcessId>,
        command: Vec<String>,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: Vec<String>) -> Self {
            Self {
                pid: child.id().map(ProcessId::from),
                child,
                command,
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn get_pid(&self) -> Option<ProcessId> {
            self.pid
        }

        fn get_command(&self) -> &[String] {
            &self.command
        }

        async fn is_running(&mut self) -> bool {
            // Reaping through try_wait keeps exited children from lingering as zombies,
            // which would still answer signal 0
            match self.child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!(pid = ?self.pid, status = ?status, "Unix process is no longer running");
                    false
                }
                Err(e) => {
                    warn!(pid = ?self.pid, error = %e, "Failed to query Unix process state");
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

    /// Signal-based termination with process-tree cleanup on force kill
    pub struct UnixProcessManager {
        system: Mutex<System>,
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    impl UnixProcessManager {
        pub fn new() -> Self {
            Self {
                system: Mutex::new(System::new()),
            }
        }

        /// Every descendant of `parent`, deepest first
        pub fn find_child_processes(&self, parent: ProcessId) -> Vec<ProcessId> {
            let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::All,
                true,
                sysinfo::ProcessRefreshKind::default(),
            );

            let mut children = Vec::new();
            Self::find_children_recursive(&system, parent.0, &mut children);
            children.into_iter().map(ProcessId::from).collect()
        }

        fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
            for (pid, process) in system.processes() {
                if process.parent().is_some_and(|ppid| ppid.as_u32() == parent_pid) {
                    let child_pid = pid.as_u32();
                    // Grandchildren first so the tree is killed bottom-up
                    Self::find_children_recursive(system, child_pid, result);
                    result.push(child_pid);
                }
            }
        }

        fn send(pid: ProcessId, sig: Signal) -> TerminationResult {
            match signal::kill(NixPid::from_raw(pid.0 as i32), sig) {
                Ok(()) => {
                    info!(pid = %pid, signal = ?sig, "Sent signal");
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::ESRCH) => {
                    debug!(pid = %pid, "Process not found (already terminated)");
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!(pid = %pid, signal = ?sig, "Permission denied");
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!(pid = %pid, signal = ?sig, error = %e, "Failed to send signal");
                    TerminationResult::Failed(format!("{sig:?} failed: {e}"))
                }
            }
        }
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            match handle.get_pid() {
                Some(pid) => Self::send(pid, Signal::SIGTERM),
                None => TerminationResult::ProcessNotFound,
            }
        }

        async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            // Collected before the root dies, while descendants are still parented to it
            let children = self.find_child_processes(pid);
            let result = Self::send(pid, Signal::SIGKILL);

            if !children.is_empty() {
                info!(pid = %pid, count = children.len(), "Killing descendant processes");
            }
            for child in children {
                match Self::send(child, Signal::SIGKILL) {
                    TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                    result => warn!(pid = %child, result = ?result, "Failed to kill descendant"),
                }
            }

            // Reap the child so it does not linger as a zombie
            if let Err(e) = handle.kill().await {
                debug!(pid = %pid, error = %e, "Handle kill cleanup failed");
            }
            result
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::process::Command;

    fn spawn(args: &[&str]) -> UnixProcessHandle {
        let child = Command::new(args[0]).args(&args[1..]).spawn().unwrap();
        UnixProcessHandle::new(child, args.iter().map(|s| s.to_string()).collect())
    }

    /// Absent, or dead and waiting to be reaped by whoever inherited it
    fn gone(pid: ProcessId) -> bool {
        let pid = sysinfo::Pid::from_u32(pid.0);
        let mut system = sysinfo::System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .is_none_or(|p| p.status() == sysinfo::ProcessStatus::Zombie)
    }

    #[tokio::test]
    async fn test_graceful_termination() {
        let manager = UnixProcessManager::new();
        let mut handle = spawn(&["sleep", "30"]);
        assert!(handle.is_running().await);

        let result = manager
            .terminate_with_grace(&mut handle, Duration::from_secs(5))
            .await;
        assert_eq!(result, TerminationResult::Success);
        assert!(!handle.is_running().await);
    }

    #[tokio::test]
    async fn test_force_kill_after_ignored_sigterm() {
        let manager = UnixProcessManager::new();
        let mut handle = spawn(&["sh", "-c", "trap '' TERM; sleep 30 & wait"]);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let pid = handle.get_pid().unwrap();
        let children = manager.find_child_processes(pid);
        assert!(!children.is_empty());

        let result = manager
            .terminate_with_grace(&mut handle, Duration::from_millis(200))
            .await;
        assert_eq!(result, TerminationResult::Success);
        assert!(!handle.is_running().await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        for child in children {
            assert!(gone(child), "descendant {child} survived");
        }
    }

    #[tokio::test]
    async fn test_exited_process_not_found() {
        let manager = UnixProcessManager::new();
        let mut handle = spawn(&["true"]);
        handle.wait().await.unwrap();

        let result = manager.terminate_gracefully(&mut handle).await;
        assert_eq!(result, TerminationResult::ProcessNotFound);
    }
}
