use std::sync::Arc;
use tether_core::{Bridge, Executor, Launcher, Session, TetherConfig, TetherError, run};
use tracing::debug;

/// Bridge strategy of the platform this crate was compiled for
#[cfg(unix)]
pub type PlatformBridge = tether_unix::SocketPairBridge;
#[cfg(windows)]
pub type PlatformBridge = tether_windows::LoopbackBridge;

/// Host executor of the platform this crate was compiled for
#[cfg(unix)]
pub type PlatformStandalone = tether_unix::Standalone;
#[cfg(windows)]
pub type PlatformStandalone = tether_windows::Standalone;

pub fn platform_bridge(config: &TetherConfig) -> Result<PlatformBridge, TetherError> {
    #[cfg(unix)]
    {
        let _ = config;
        Ok(tether_unix::SocketPairBridge)
    }

    #[cfg(windows)]
    {
        tether_windows::LoopbackBridge::new(config)
    }
}

pub fn platform_name() -> &'static str {
    #[cfg(unix)]
    return "unix";

    #[cfg(windows)]
    return "windows";
}

/// Start `launcher` through `executor`, bridging a channel to the target when `redirect`
/// is set. The returned session owns every spawned stage.
pub async fn launch<L: Launcher + ?Sized>(
    launcher: &L,
    executor: Arc<dyn Executor>,
    redirect: bool,
    config: &TetherConfig,
) -> Result<Session<L::Helper>, TetherError> {
    config
        .validate()
        .map_err(|e| TetherError::ConfigurationError(e.to_string()))?;

    debug!(platform = platform_name(), redirect, "Launching");
    if redirect {
        let bridge = platform_bridge(config)?;
        run(launcher, executor, Some(&bridge as &dyn Bridge)).await
    } else {
        run(launcher, executor, None).await
    }
}
