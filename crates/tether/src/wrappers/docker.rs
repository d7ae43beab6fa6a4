use super::Trampoline;
use async_trait::async_trait;
use tether_core::{Executor, SpawnRequest, Spawned, TetherConfig, TetherError};

/// Runs remote processes inside a running container via `docker exec`.
///
/// Local processes (debugger front ends, tracers) stay on the controller's host.
#[derive(Debug, Clone)]
pub struct Docker<E> {
    executor: E,
    name: String,
    options: Vec<String>,
    trampoline: Trampoline,
    docker: String,
}

impl<E: Executor> Docker<E> {
    pub fn new(executor: E, name: impl Into<String>) -> Self {
        Self::with_config(executor, name, &TetherConfig::default())
    }

    pub fn with_config(executor: E, name: impl Into<String>, config: &TetherConfig) -> Self {
        Self {
            executor,
            name: name.into(),
            options: Vec::new(),
            trampoline: Trampoline::from_config(config),
            docker: "docker".to_string(),
        }
    }

    /// Extra `docker exec` options, e.g. `-u root` or `-w /srv`
    pub fn options<S: ToString, I: IntoIterator<Item = S>>(mut self, options: I) -> Self {
        self.options = options.into_iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn program(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    pub fn trampoline(mut self, trampoline: Trampoline) -> Self {
        self.trampoline = trampoline;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `docker exec [-i] <options> <name>`
    fn exec(&self, interactive: bool) -> Vec<String> {
        let mut command = vec![self.docker.clone(), "exec".to_string()];
        if interactive {
            command.push("-i".to_string());
        }
        command.extend(self.options.iter().cloned());
        command.push(self.name.clone());
        command
    }
}

#[async_trait]
impl<E: Executor> Executor for Docker<E> {
    async fn local(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.executor.local(request).await
    }

    async fn remote(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        let spawn_prefix = self.exec(request.interactive);
        self.trampoline
            .spawn_remote(&self.executor, request, spawn_prefix, &self.exec(false))
            .await
    }
}
