use backon::ExponentialBuilder;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Configuration for retry logic used when polling for pid files and connecting to targets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Minimum delay between retry attempts (in milliseconds)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum delay between retry attempts (in milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum number of retry attempts (0 means no retries, just one attempt)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Whether to use exponential backoff (true) or fixed delay (false)
    #[serde(default = "default_use_exponential_backoff")]
    pub use_exponential_backoff: bool,

    /// Jitter factor for randomizing delays (0.0 to 1.0)
    /// 0.0 = no jitter, anything above enables jitter
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            use_exponential_backoff: default_use_exponential_backoff(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig with aggressive retry settings
    pub fn aggressive() -> Self {
        Self {
            min_delay_ms: 10,
            max_delay_ms: 1_000,
            max_attempts: 10,
            use_exponential_backoff: true,
            jitter_factor: 0.1,
        }
    }

    /// Create a RetryConfig with no retries (fail fast)
    pub fn no_retry() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
            max_attempts: 1, // One attempt, no retries
            use_exponential_backoff: false,
            jitter_factor: 0.0,
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(anyhow::anyhow!(
                "min_delay_ms cannot be greater than max_delay_ms"
            ));
        }

        if self.jitter_factor < 0.0 || self.jitter_factor > 1.0 {
            return Err(anyhow::anyhow!("jitter_factor must be between 0.0 and 1.0"));
        }

        if self.max_attempts > 50 {
            return Err(anyhow::anyhow!(
                "max_attempts should not exceed 50 to avoid excessive retries"
            ));
        }

        if self.max_delay_ms > 60_000 {
            return Err(anyhow::anyhow!("max_delay_ms should not exceed 60 seconds"));
        }

        Ok(())
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check if retries are enabled (more than 1 attempt)
    pub fn retries_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Creates the backon strategy matching this configuration
    pub fn backoff(&self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay())
            .with_max_delay(self.max_delay())
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);

        if !self.use_exponential_backoff {
            builder = builder.with_factor(1.0);
        }

        if self.jitter_factor > 0.0 {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Main configuration shared by executors, bridges and channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(setter(into), build_fn(validate = "Self::validate_fields"))]
pub struct TetherConfig {
    /// Grace window between graceful termination and force kill (in milliseconds)
    #[serde(default = "default_grace_period_ms")]
    #[builder(default = "default_grace_period_ms()")]
    pub grace_period_ms: u64,

    /// Size of a single read from the underlying stream
    #[serde(default = "default_read_chunk_size")]
    #[builder(default = "default_read_chunk_size()")]
    pub read_chunk_size: usize,

    /// Chunks buffered ahead of the reader before the peer is throttled
    #[serde(default = "default_read_queue_depth")]
    #[builder(default = "default_read_queue_depth()")]
    pub read_queue_depth: usize,

    /// Loopback address used by the loopback-duplication bridge
    #[serde(default = "default_localhost")]
    #[builder(default = "default_localhost()")]
    pub localhost: String,

    /// File a trampoline shell writes its own pid into
    #[serde(default = "default_pidfile")]
    #[builder(default = "default_pidfile()")]
    pub pidfile: String,

    #[serde(default)]
    #[builder(default)]
    pub retry: RetryConfig,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            read_chunk_size: default_read_chunk_size(),
            read_queue_depth: default_read_queue_depth(),
            localhost: default_localhost(),
            pidfile: default_pidfile(),
            retry: RetryConfig::default(),
        }
    }
}

impl TetherConfig {
    pub fn builder() -> TetherConfigBuilder {
        TetherConfigBuilder::default()
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Parsed loopback address
    pub fn localhost_addr(&self) -> anyhow::Result<IpAddr> {
        self.localhost
            .parse::<IpAddr>()
            .map_err(|e| anyhow::anyhow!("invalid loopback address {:?}: {e}", self.localhost))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.read_chunk_size == 0 {
            return Err(anyhow::anyhow!("read_chunk_size must be greater than zero"));
        }

        if self.read_queue_depth == 0 {
            return Err(anyhow::anyhow!("read_queue_depth must be greater than zero"));
        }

        if self.pidfile.trim().is_empty() {
            return Err(anyhow::anyhow!("pidfile must not be empty"));
        }

        let addr = self.localhost_addr()?;
        if !addr.is_loopback() {
            return Err(anyhow::anyhow!("{addr} is not a loopback address"));
        }

        self.retry.validate()
    }
}

impl TetherConfigBuilder {
    fn validate_fields(&self) -> Result<(), String> {
        if self.read_chunk_size == Some(0) {
            return Err("read_chunk_size must be greater than zero".to_string());
        }

        if self.read_queue_depth == Some(0) {
            return Err("read_queue_depth must be greater than zero".to_string());
        }

        if let Some(ref localhost) = self.localhost {
            localhost
                .parse::<IpAddr>()
                .map_err(|e| format!("invalid loopback address {localhost:?}: {e}"))?;
        }

        Ok(())
    }
}

// Default value functions for serde
fn default_min_delay_ms() -> u64 {
    20
}
fn default_max_delay_ms() -> u64 {
    1_000
}
fn default_max_attempts() -> u32 {
    8
}
fn default_use_exponential_backoff() -> bool {
    true
}
fn default_jitter_factor() -> f64 {
    0.0
}
fn default_grace_period_ms() -> u64 {
    1_000
}
fn default_read_chunk_size() -> usize {
    0x1000
}
fn default_read_queue_depth() -> usize {
    16
}
fn default_localhost() -> String {
    "127.0.0.1".to_string()
}
fn default_pidfile() -> String {
    "/var/run/tether.pid".to_string()
}
