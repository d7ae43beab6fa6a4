use super::Trampoline;
use async_trait::async_trait;
use tether_core::{Executor, SpawnRequest, Spawned, TetherConfig, TetherError};

/// Runs remote processes behind an arbitrary command prefix such as `ssh host`,
/// `sudo -u ctf` or `chroot /srv/jail`. The prefix must run its trailing arguments
/// as a command.
#[derive(Debug, Clone)]
pub struct Prefixed<E> {
    executor: E,
    prefix: Vec<String>,
    trampoline: Trampoline,
}

impl<E: Executor> Prefixed<E> {
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(executor: E, prefix: I) -> Self {
        Self::with_config(executor, prefix, &TetherConfig::default())
    }

    pub fn with_config<S: ToString, I: IntoIterator<Item = S>>(
        executor: E,
        prefix: I,
        config: &TetherConfig,
    ) -> Self {
        Self {
            executor,
            prefix: prefix.into_iter().map(|s| s.to_string()).collect(),
            trampoline: Trampoline::from_config(config),
        }
    }

    pub fn trampoline(mut self, trampoline: Trampoline) -> Self {
        self.trampoline = trampoline;
        self
    }

    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }
}

#[async_trait]
impl<E: Executor> Executor for Prefixed<E> {
    async fn local(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.executor.local(request).await
    }

    async fn remote(&self, request: SpawnRequest<'_>) -> Result<Spawned, TetherError> {
        self.trampoline
            .spawn_remote(&self.executor, request, self.prefix.clone(), &self.prefix)
            .await
    }
}
