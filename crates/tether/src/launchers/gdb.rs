//! gdb / gdbserver launchers

use super::Program;
use async_trait::async_trait;
use std::sync::Arc;
use tether_core::{
    Attach, AttachStep, Endpoint, Executor, Launcher, ProcessId, SpawnRequest, TeardownStack,
    TetherError,
};
use tracing::info;

/// Settings of the gdb client and of the gdbserver it connects to
#[derive(Debug, Clone)]
pub struct Client {
    /// Address gdbserver listens on; empty means every interface
    pub host: String,
    pub port: u16,
    /// Local copy of the target binary, for symbols
    pub file: Option<String>,
    pub sysroot: Option<String>,
    /// First command gdb runs; `{host}` and `{port}` are substituted
    pub startup: String,
    pub script: Option<String>,
    pub gdb: String,
    pub gdbserver: String,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1234,
            file: None,
            sysroot: None,
            startup: "target remote {host}:{port}".to_string(),
            script: None,
            gdb: "gdb".to_string(),
            gdbserver: "gdbserver".to_string(),
        }
    }
}

impl Client {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `gdb [-ex 'set sysroot ..'] -ex <startup> [-x script] [file]`
    pub fn cli(&self) -> Vec<String> {
        let mut command = vec![self.gdb.clone()];

        if let Some(sysroot) = &self.sysroot {
            command.push("-ex".to_string());
            command.push(format!("set sysroot {sysroot}"));
        }

        command.push("-ex".to_string());
        command.push(
            self.startup
                .replace("{host}", &self.host)
                .replace("{port}", &self.port.to_string()),
        );

        if let Some(script) = &self.script {
            command.push("-x".to_string());
            command.push(script.clone());
        }

        command.extend(self.file.iter().cloned());
        command
    }
}

/// Starts the target under gdbserver and connects a gdb client right away
#[derive(Debug, Clone)]
pub struct Debugger {
    pub program: Program,
    pub client: Client,
    /// Extra gdbserver options, placed before the listen address
    pub options: Vec<String>,
}

impl Debugger {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            client: Client::default(),
            options: Vec::new(),
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn options<S: ToString, I: IntoIterator<Item = S>>(mut self, options: I) -> Self {
        self.options = options.into_iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn server(&self) -> Vec<String> {
        let mut command = vec![self.client.gdbserver.clone()];

        command.push(if self.program.aslr {
            "--no-disable-randomization".to_string()
        } else {
            "--disable-randomization".to_string()
        });

        if !self.program.env.is_empty() {
            command.push("--wrapper".to_string());
            command.push(self.program.env_program.clone());
            command.extend(self.program.assignments());
            command.push("--".to_string());
        }

        command.extend(self.options.iter().cloned());
        command.push(self.client.address());
        command.extend(self.program.command.iter().cloned());
        command
    }
}

#[async_trait]
impl Launcher for Debugger {
    type Helper = ();

    async fn launch(
        &self,
        executor: Arc<dyn Executor>,
        redirect: Option<&Endpoint>,
        stack: &mut TeardownStack,
    ) -> Result<(), TetherError> {
        let server = SpawnRequest::new(self.server())
            .redirect(redirect)
            .interactive(redirect.is_some());
        stack.push(executor.remote(server).await?);

        let cli = SpawnRequest::new(self.client.cli()).interactive(true);
        stack.push(executor.local(cli).await?);

        info!(address = %self.client.address(), "Debugger connected");
        Ok(())
    }
}

/// Starts the target on its own and attaches gdbserver and gdb on demand
#[derive(Debug, Clone)]
pub struct Attacher {
    pub program: Program,
    pub client: Client,
}

impl Attacher {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            client: Client::default(),
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn steps(&self, pid: ProcessId) -> Vec<AttachStep> {
        vec![
            AttachStep::remote([
                self.client.gdbserver.clone(),
                "--attach".to_string(),
                self.client.address(),
                pid.to_string(),
            ]),
            AttachStep::local(self.client.cli()).interactive(true),
        ]
    }
}

#[async_trait]
impl Launcher for Attacher {
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

        let target = executor.remote(request).await?;
        let pid = target.pid();
        stack.push(target);

        let pid = pid.ok_or_else(|| {
            TetherError::AttachUnavailable("executor did not report the target pid".to_string())
        })?;
        info!(pid = %pid, "Target running, attach deferred");
        Ok(Attach::new(executor, pid, self.steps(pid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingExecutor, argv};
    use tether_core::{SessionState, Spawned, run};

    #[test]
    fn test_client_command() {
        let client = Client {
            host: "10.0.0.2".to_string(),
            sysroot: Some("/".to_string()),
            script: Some("break.gdb".to_string()),
            file: Some("./a.out".to_string()),
            ..Client::default()
        };

        assert_eq!(
            client.cli(),
            argv(&[
                "gdb",
                "-ex",
                "set sysroot /",
                "-ex",
                "target remote 10.0.0.2:1234",
                "-x",
                "break.gdb",
                "./a.out",
            ])
        );
    }

    #[test]
    fn test_server_command() {
        let debugger = Debugger::new(Program::new(["./a.out", "arg"]).aslr(false).env("A", "1"))
            .options(["--once"]);

        assert_eq!(
            debugger.server(),
            argv(&[
                "gdbserver",
                "--disable-randomization",
                "--wrapper",
                "env",
                "A=1",
                "--",
                "--once",
                ":1234",
                "./a.out",
                "arg",
            ])
        );
    }

    #[tokio::test]
    async fn test_debugger_starts_server_then_client() {
        let executor = Arc::new(RecordingExecutor::default());
        let debugger = Debugger::new(Program::new(["./a.out"]));

        let mut session = run(&debugger, executor.clone(), None).await.unwrap();
        assert_eq!(session.state(), SessionState::Started);
        session.close().await.unwrap();

        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].remote);
        assert!(!requests[0].interactive);
        assert_eq!(requests[0].command[0], "gdbserver");
        assert!(!requests[1].remote);
        assert!(requests[1].interactive);
        assert_eq!(
            requests[1].command,
            argv(&["gdb", "-ex", "target remote :1234"])
        );

        // Client first, then server
        let stopped = executor.stopped();
        assert_eq!(stopped[0], requests[1].command);
        assert_eq!(stopped[1], requests[0].command);
    }

    #[tokio::test]
    async fn test_attacher_defers_debugger() {
        let executor = Arc::new(RecordingExecutor::default());
        let attacher = Attacher::new(Program::new(["./a.out"]));

        let mut session = run(&attacher, executor.clone(), None).await.unwrap();
        assert_eq!(session.state(), SessionState::AttachPending);
        assert_eq!(session.stages().len(), 1);
        assert_eq!(executor.requests().len(), 1);
        assert!(executor.requests()[0].tracable);

        session.attach().await.unwrap();
        assert_eq!(session.state(), SessionState::Attached);
        assert_eq!(session.stages().len(), 3);

        let requests = executor.requests();
        assert_eq!(
            requests[1].command,
            argv(&["gdbserver", "--attach", ":1234", "1000"])
        );
        assert!(requests[1].remote);
        assert_eq!(requests[2].command, argv(&["gdb", "-ex", "target remote :1234"]));
        assert!(requests[2].interactive);

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(executor.stopped().last(), Some(&requests[0].command));
    }

    /// Reports no pid for anything it spawns
    struct Blind(Arc<RecordingExecutor>);

    #[async_trait]
    impl Executor for Blind {
        async fn local(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
            self.0.local(request).await
        }

        async fn remote(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
            Ok(self.0.remote(request).await?.with_reported_pid(None))
        }
    }

    #[tokio::test]
    async fn test_attacher_without_pid_is_unavailable() {
        let executor = Arc::new(RecordingExecutor::default());
        let attacher = Attacher::new(Program::new(["./a.out"]));

        let err = run(&attacher, Arc::new(Blind(executor.clone())), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::AttachUnavailable(_)));
        assert_eq!(executor.stopped(), vec![argv(&["./a.out"])]);
    }
}
