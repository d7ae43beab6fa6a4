//! Ready-made launch strategies.
//!
//! Each launcher spawns its stages through whatever executor it is given, so the same
//! `gdb::Attacher` works against a local binary, a container or a remote host.

pub mod gdb;
pub mod strace;

mod runner;

pub use runner::Runner;

/// Target command line plus the environment tweaks shared by every launcher
#[derive(Debug, Clone)]
pub struct Program {
    pub command: Vec<String>,
    /// Passed through `env K=V ...`, in insertion order
    pub env: Vec<(String, String)>,
    /// Address space layout randomization; disabled through `setarch -R`
    pub aslr: bool,
    pub setarch: String,
    pub env_program: String,
}

impl Program {
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(command: I) -> Self {
        Self {
            command: command.into_iter().map(|s| s.to_string()).collect(),
            env: Vec::new(),
            aslr: true,
            setarch: "setarch".to_string(),
            env_program: "env".to_string(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn aslr(mut self, aslr: bool) -> Self {
        self.aslr = aslr;
        self
    }

    /// `K=V` assignments as passed to `env`
    pub(crate) fn assignments(&self) -> impl Iterator<Item = String> + '_ {
        self.env.iter().map(|(k, v)| format!("{k}={v}"))
    }

    /// `[setarch -R] [env K=V ...] command`
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::new();

        if !self.aslr {
            argv.push(self.setarch.clone());
            argv.push("-R".to_string());
        }

        if !self.env.is_empty() {
            argv.push(self.env_program.clone());
            argv.extend(self.assignments());
        }

        argv.extend(self.command.iter().cloned());
        argv
    }
}
