use super::Program;
use async_trait::async_trait;
use std::sync::Arc;
use tether_core::{Endpoint, Executor, Launcher, SpawnRequest, TeardownStack, TetherError};
use tracing::info;

/// Runs the target alone. A redirected target is spawned interactive so it reads its
/// input from the bridge.
#[derive(Debug, Clone)]
pub struct Runner {
    pub program: Program,
}

impl Runner {
    pub fn new(program: Program) -> Self {
        Self { program }
    }
}

#[async_trait]
impl Launcher for Runner {
    type Helper = ();

    async fn launch(
        &self,
        executor: Arc<dyn Executor>,
        redirect: Option<&Endpoint>,
        stack: &mut TeardownStack,
    ) -> Result<(), TetherError> {
        let request = SpawnRequest::new(self.program.argv())
            .redirect(redirect)
            .interactive(redirect.is_some());

        let target = executor.remote(request).await?;
        info!(pid = ?target.pid(), command = ?target.command(), "Target running");
        stack.push(target);
        Ok(())
    }
}
