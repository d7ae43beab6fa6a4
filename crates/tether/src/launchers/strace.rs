//! strace launcher

use super::Program;
use async_trait::async_trait;
use std::sync::Arc;
use tether_core::{
    Attach, AttachStep, Endpoint, Executor, Launcher, ProcessId, SpawnRequest, TeardownStack,
    TetherError,
};
use tracing::info;

/// Starts the target on the controller's host and attaches strace on demand
#[derive(Debug, Clone)]
pub struct Tracer {
    pub program: Program,
    /// Extra strace options, e.g. `-f -e trace=network`
    pub options: Vec<String>,
    pub strace: String,
}

impl Tracer {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            options: Vec::new(),
            strace: "strace".to_string(),
        }
    }

    pub fn options<S: ToString, I: IntoIterator<Item = S>>(mut self, options: I) -> Self {
        self.options = options.into_iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn strace(mut self, strace: impl Into<String>) -> Self {
        self.strace = strace.into();
        self
    }

    pub fn cli(&self, pid: ProcessId) -> Vec<String> {
        let mut command = vec![self.strace.clone()];
        command.extend(self.options.iter().cloned());
        command.push("-p".to_string());
        command.push(pid.to_string());
        command
    }
}

#[async_trait]
impl Launcher for Tracer {
    type Helper = Attach;

    async fn launch(
        &self,
        executor: Arc<dyn Executor>,
        redirect: Option<&Endpoint>,
        stack: &mut TeardownStack,
    ) -> Result<Attach, TetherError> {
        let request = SpawnRequest::new(self.program.argv())
            .redirect(redirect)
            .interactive(redirect.is_some())
            .tracable(true);

        let target = executor.local(request).await?;
        let pid = target.pid();
        stack.push(target);

        let pid = pid.ok_or_else(|| {
            TetherError::AttachUnavailable("executor did not report the target pid".to_string())
        })?;
        info!(pid = %pid, "Target running, trace deferred");

        let steps = vec![AttachStep::local(self.cli(pid)).interactive(true)];
        Ok(Attach::new(executor, pid, steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingExecutor, argv};
    use tether_core::{SessionState, run};

    #[tokio::test]
    async fn test_trace_attaches_locally() {
        let executor = Arc::new(RecordingExecutor::default());
        let tracer = Tracer::new(Program::new(["./a.out"])).options(["-f"]);

        let mut session = run(&tracer, executor.clone(), None).await.unwrap();
        assert_eq!(session.state(), SessionState::AttachPending);

        let target = &executor.requests()[0];
        assert!(!target.remote);
        assert!(target.tracable);
        assert!(!target.interactive);

        session.attach().await.unwrap();
        // A second attach spawns nothing
        session.attach().await.unwrap();
        assert_eq!(session.state(), SessionState::Attached);

        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].command, argv(&["strace", "-f", "-p", "1000"]));
        assert!(requests[1].interactive);
        assert!(!requests[1].remote);

        session.close().await.unwrap();
        assert_eq!(
            executor.stopped(),
            vec![requests[1].command.clone(), requests[0].command.clone()]
        );
    }
}
