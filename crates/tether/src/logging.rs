//! Subscriber setup for binaries and tests.
//!
//! Output goes to stderr so it never mixes with a target's redirected stdout.

use tether_core::TetherError;
use tracing_subscriber::EnvFilter;

fn filter(directives: Option<&str>) -> Result<EnvFilter, TetherError> {
    match directives {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| TetherError::ConfigurationError(format!("invalid log filter: {e}"))),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Install a human readable subscriber. `directives` overrides `RUST_LOG`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init(directives: Option<&str>) -> Result<bool, TetherError> {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter(directives)?)
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .try_init()
        .is_ok();
    Ok(installed)
}

/// Install a JSON subscriber, one object per event
pub fn init_json(directives: Option<&str>) -> Result<bool, TetherError> {
    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter(directives)?)
        .with_writer(std::io::stderr)
        .with_current_span(false)
        .try_init()
        .is_ok();
    Ok(installed)
}
