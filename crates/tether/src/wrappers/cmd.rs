use super::pop_up;
use async_trait::async_trait;
use tether_core::{Executor, SpawnRequest, Spawned, TetherError};

/// Opens interactive, unredirected processes in a new console window with `start`
#[derive(Debug, Clone)]
pub struct Cmd<E> {
    executor: E,
    cmd: String,
}

impl<E: Executor> Cmd<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            cmd: "cmd.exe".to_string(),
        }
    }

    pub fn program(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = cmd.into();
        self
    }

    fn start(&self) -> Vec<String> {
        vec![self.cmd.clone(), "/c".to_string(), "start".to_string()]
    }
}

#[async_trait]
impl<E: Executor> Executor for Cmd<E> {
    async fn local(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.executor.local(pop_up(request, &self.start())).await
    }

    async fn remote(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.executor.remote(pop_up(request, &self.start())).await
    }
}
