//! Session composition: ordered executor invocations with strict LIFO teardown.

use crate::bridge::Bridge;
use crate::endpoint::Endpoint;
use crate::error::TetherError;
use crate::executor::{Executor, SpawnRequest, Spawned};
use crate::process::ProcessId;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ordered stack of active stages. Stages are torn down most recent first.
#[derive(Debug, Default)]
pub struct TeardownStack {
    stages: Vec<Spawned>,
}

impl TeardownStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Spawned) {
        debug!(pid = ?stage.pid(), depth = self.stages.len() + 1, "Entered stage");
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Reported pids of every active stage, in setup order
    pub fn pids(&self) -> Vec<Option<ProcessId>> {
        self.stages.iter().map(Spawned::pid).collect()
    }

    /// Tear down every stage
    pub async fn unwind(&mut self) -> Result<(), TetherError> {
        self.unwind_to(0).await
    }

    /// Tear down stages until only `mark` remain.
    ///
    /// Every stage is closed even when an earlier close fails; the first failure is
    /// returned.
    pub async fn unwind_to(&mut self, mark: usize) -> Result<(), TetherError> {
        let mut first_error = None;

        while self.stages.len() > mark {
            let Some(stage) = self.stages.pop() else {
                break;
            };
            let pid = stage.pid();

            if let Err(e) = stage.close().await {
                warn!(pid = ?pid, error = %e, "Stage teardown failed");
                first_error.get_or_insert(e);
            } else {
                debug!(pid = ?pid, "Stage torn down");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for TeardownStack {
    fn drop(&mut self) {
        if !self.stages.is_empty() {
            warn!(
                stages = self.stages.len(),
                "Teardown stack dropped while stages are active"
            );
            // Pop in reverse so kill-on-drop runs in LIFO order as well
            while let Some(stage) = self.stages.pop() {
                drop(stage);
            }
        }
    }
}

/// Progress of a deferred attach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Pending,
    Attached,
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Started,
    AttachPending,
    Attached,
    Closed,
}

/// Value a launcher yields while its session is active
pub trait Helper: Send {
    /// Attach progress, `None` for helpers that defer nothing
    fn attach_state(&self) -> Option<AttachState> {
        None
    }
}

impl Helper for () {}

/// Where a deferred step runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The controller's own environment
    Local,
    /// The environment the target lives in
    Remote,
}

/// One deferred executor invocation
#[derive(Debug, Clone)]
pub struct AttachStep {
    pub target: Target,
    pub command: Vec<String>,
    pub interactive: bool,
}

impl AttachStep {
    pub fn local<S: ToString, I: IntoIterator<Item = S>>(command: I) -> Self {
        Self {
            target: Target::Local,
            command: command.into_iter().map(|s| s.to_string()).collect(),
            interactive: false,
        }
    }

    pub fn remote<S: ToString, I: IntoIterator<Item = S>>(command: I) -> Self {
        Self {
            target: Target::Remote,
            command: command.into_iter().map(|s| s.to_string()).collect(),
            interactive: false,
        }
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

/// Deferred attach: spawns its steps when performed, not when the session starts.
pub struct Attach {
    executor: Arc<dyn Executor>,
    target_pid: ProcessId,
    steps: Vec<AttachStep>,
    state: AttachState,
}

impl std::fmt::Debug for Attach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attach")
            .field("target_pid", &self.target_pid)
            .field("steps", &self.steps)
            .field("state", &self.state)
            .finish()
    }
}

impl Attach {
    pub fn new(executor: Arc<dyn Executor>, target_pid: ProcessId, steps: Vec<AttachStep>) -> Self {
        Self {
            executor,
            target_pid,
            steps,
            state: AttachState::Pending,
        }
    }

    /// Pid of the process this attach targets
    pub fn target_pid(&self) -> ProcessId {
        self.target_pid
    }

    pub fn state(&self) -> AttachState {
        self.state
    }

    pub fn steps(&self) -> &[AttachStep] {
        &self.steps
    }

    /// Spawn every step, registering each on `stack` so it is torn down before the
    /// stages that were entered earlier.
    ///
    /// Performing twice is a no-op. If a step fails, the steps this call already spawned
    /// are torn down and the attach stays pending.
    pub async fn perform(&mut self, stack: &mut TeardownStack) -> Result<(), TetherError> {
        if self.state == AttachState::Attached {
            warn!(pid = %self.target_pid, "Attach already performed");
            return Ok(());
        }

        let mark = stack.len();
        info!(pid = %self.target_pid, steps = self.steps.len(), "Attaching");

        for step in &self.steps {
            let request = SpawnRequest::new(step.command.iter()).interactive(step.interactive);
            let spawned = match step.target {
                Target::Local => self.executor.local(request).await,
                Target::Remote => self.executor.remote(request).await,
            };

            match spawned {
                Ok(spawned) => stack.push(spawned),
                Err(e) => {
                    warn!(pid = %self.target_pid, error = %e, "Attach step failed, unwinding");
                    if let Err(unwind) = stack.unwind_to(mark).await {
                        warn!(error = %unwind, "Failed to unwind partial attach");
                    }
                    return Err(e);
                }
            }
        }

        self.state = AttachState::Attached;
        Ok(())
    }
}

impl Helper for Attach {
    fn attach_state(&self) -> Option<AttachState> {
        Some(self.state)
    }
}

/// Reusable strategy performing a fixed, ordered sequence of executor invocations.
///
/// Every spawned stage must be pushed onto `stack`. When `launch` fails partway, the
/// caller unwinds whatever was pushed.
#[async_trait]
pub trait Launcher: Send + Sync {
    type Helper: Helper;

    async fn launch(
        &self,
        executor: Arc<dyn Executor>,
        redirect: Option<&Endpoint>,
        stack: &mut TeardownStack,
    ) -> Result<Self::Helper, TetherError>;
}

/// An active launch: its stages, the helper it yielded and the controller endpoint.
pub struct Session<H: Helper> {
    stack: TeardownStack,
    helper: H,
    connection: Option<Endpoint>,
    closed: bool,
}

impl<H: Helper> Session<H> {
    pub fn new(stack: TeardownStack, helper: H, connection: Option<Endpoint>) -> Self {
        Self {
            stack,
            helper,
            connection,
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            return SessionState::Closed;
        }

        match self.helper.attach_state() {
            None => SessionState::Started,
            Some(AttachState::Pending) => SessionState::AttachPending,
            Some(AttachState::Attached) => SessionState::Attached,
        }
    }

    pub fn helper(&self) -> &H {
        &self.helper
    }

    pub fn stages(&self) -> &TeardownStack {
        &self.stack
    }

    /// Controller side of the bridge, if one was requested
    pub fn connection(&self) -> Option<&Endpoint> {
        self.connection.as_ref()
    }

    pub fn take_connection(&mut self) -> Option<Endpoint> {
        self.connection.take()
    }

    /// Tear down every stage in reverse order, then close the connection.
    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), TetherError> {
        if self.closed {
            return Ok(());
        }

        info!(stages = self.stack.len(), "Closing session");
        let result = self.stack.unwind().await;

        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }

        self.closed = true;
        result
    }
}

impl<H: Helper + std::fmt::Debug> std::fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("stages", &self.stack.pids())
            .field("helper", &self.helper)
            .field("connection", &self.connection)
            .finish()
    }
}

impl Session<Attach> {
    /// Perform the deferred attach (`AttachPending -> Attached`)
    pub async fn attach(&mut self) -> Result<(), TetherError> {
        self.helper.perform(&mut self.stack).await
    }
}

/// Start a launcher, optionally over a freshly bridged channel.
///
/// The bridge runs first; its child side is handed to the launcher as the redirect target
/// and closed in this process once the launcher has started, so the controller observes
/// end-of-stream when the target exits. If the launcher fails, the stages it entered are
/// unwound before the error propagates.
pub async fn run<L: Launcher + ?Sized>(
    launcher: &L,
    executor: Arc<dyn Executor>,
    bridge: Option<&dyn Bridge>,
) -> Result<Session<L::Helper>, TetherError> {
    let (connection, mut redirect) = match bridge {
        Some(bridge) => {
            let pair = bridge.bridge()?;
            (Some(pair.controller), Some(pair.child))
        }
        None => (None, None),
    };

    let mut stack = TeardownStack::new();

    match launcher.launch(executor, redirect.as_ref(), &mut stack).await {
        Ok(helper) => {
            if let Some(redirect) = redirect.as_mut() {
                redirect.close();
            }
            info!(stages = stack.len(), bridged = connection.is_some(), "Session started");
            Ok(Session::new(stack, helper, connection))
        }
        Err(e) => {
            warn!(error = %e, stages = stack.len(), "Launch failed, unwinding entered stages");
            if let Err(unwind) = stack.unwind().await {
                warn!(error = %unwind, "Failed to unwind stages after launch failure");
            }
            Err(e)
        }
    }
}
