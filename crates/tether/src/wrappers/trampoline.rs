use backon::Retryable;
use tether_core::{
    Executor, ProcessId, RetryConfig, SpawnRequest, Spawned, TetherConfig, TetherError,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Shell trampoline recovering the real pid of a process spawned through another command.
///
/// The command runs as `sh -c 'echo $$ > <pidfile>; exec <command>;'`, so the shell's pid,
/// written to the pid file, becomes the command's pid after `exec`. The pid file is read
/// back through the same command prefix.
#[derive(Debug, Clone)]
pub struct Trampoline {
    pub pidfile: String,
    pub retry: RetryConfig,
    pub sh: String,
    pub cat: String,
}

impl Default for Trampoline {
    fn default() -> Self {
        Self::from_config(&TetherConfig::default())
    }
}

impl Trampoline {
    pub fn from_config(config: &TetherConfig) -> Self {
        Self {
            pidfile: config.pidfile.clone(),
            retry: config.retry.clone(),
            sh: "sh".to_string(),
            cat: "cat".to_string(),
        }
    }

    pub fn wrap(&self, command: &[String]) -> Vec<String> {
        vec![
            self.sh.clone(),
            "-c".to_string(),
            format!(
                "echo $$ > {}; exec {};",
                shell_words::quote(&self.pidfile),
                shell_words::join(command)
            ),
        ]
    }

    /// `prefix` followed by the command printing the pid file
    pub fn query(&self, prefix: &[String]) -> Vec<String> {
        let mut command = prefix.to_vec();
        command.push(self.cat.clone());
        command.push(self.pidfile.clone());
        command
    }

    /// Read the pid file through `prefix`, retrying while it is missing or incomplete
    pub async fn read_pid(&self, prefix: &[String]) -> Result<ProcessId, TetherError> {
        let query = self.query(prefix);

        let result = (|| read_once(&query))
            .retry(self.retry.backoff())
            .when(|e: &TetherError| !e.is_permanent())
            .notify(|e, delay| debug!(error = %e, delay = ?delay, "Pid file not ready, retrying"))
            .await;

        if let Ok(pid) = &result {
            info!(pid = %pid, pidfile = %self.pidfile, "Resolved traced process id");
        }
        result
    }

    /// Spawn `request` through `executor` behind `spawn_prefix`, wrapping it in the
    /// trampoline when it is tracable. Without tracing the reported pid is unavailable,
    /// since it would only be the prefix command's.
    pub(crate) async fn spawn_remote<E: Executor + ?Sized>(
        &self,
        executor: &E,
        mut request: SpawnRequest<'_>,
        spawn_prefix: Vec<String>,
        query_prefix: &[String],
    ) -> Result<Spawned, TetherError> {
        let tracable = request.tracable;
        request.program()?;

        let inner = if tracable {
            self.wrap(&request.command)
        } else {
            std::mem::take(&mut request.command)
        };
        let mut command = spawn_prefix;
        command.extend(inner);
        request.command = command;
        request.tracable = false;

        let spawned = executor.remote(request).await?;
        if !tracable {
            return Ok(spawned.with_reported_pid(None));
        }

        match self.read_pid(query_prefix).await {
            Ok(pid) => Ok(spawned.with_reported_pid(Some(pid))),
            Err(e) => {
                warn!(error = %e, "Could not resolve traced process id, tearing down");
                if let Err(close) = spawned.close().await {
                    warn!(error = %close, "Teardown after failed pid lookup failed");
                }
                Err(e)
            }
        }
    }
}

async fn read_once(query: &[String]) -> Result<ProcessId, TetherError> {
    let Some((program, args)) = query.split_first() else {
        return Err(TetherError::ConfigurationError("empty pid query".to_string()));
    };

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| TetherError::spawn_failed(query, e))?;

    if !output.status.success() {
        return Err(TetherError::AttachUnavailable(format!(
            "{} exited with {}: {}",
            query.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    text.parse::<ProcessId>().map_err(|e| {
        TetherError::AttachUnavailable(format!("pid file holds {:?}: {e}", text.trim()))
    })
}
