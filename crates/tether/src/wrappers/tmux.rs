use super::pop_up;
use async_trait::async_trait;
use tether_core::{Executor, SpawnRequest, Spawned, TetherError};

/// Opens interactive, unredirected processes in a new tmux pane
#[derive(Debug, Clone)]
pub struct Tmux<E> {
    executor: E,
    options: Vec<String>,
    tmux: String,
}

impl<E: Executor> Tmux<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            options: Vec::new(),
            tmux: "tmux".to_string(),
        }
    }

    /// Extra `tmux split` options, e.g. `-h`
    pub fn options<S: ToString, I: IntoIterator<Item = S>>(mut self, options: I) -> Self {
        self.options = options.into_iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn program(mut self, tmux: impl Into<String>) -> Self {
        self.tmux = tmux.into();
        self
    }

    fn split(&self) -> Vec<String> {
        let mut command = vec![self.tmux.clone(), "split".to_string()];
        command.extend(self.options.iter().cloned());
        command
    }
}

#[async_trait]
impl<E: Executor> Executor for Tmux<E> {
    async fn local(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.executor.local(pop_up(request, &self.split())).await
    }

    async fn remote(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.executor.remote(pop_up(request, &self.split())).await
    }
}
