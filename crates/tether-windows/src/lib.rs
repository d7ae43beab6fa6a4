//! Windows-specific executor, loopback bridge and process termination

mod windows_process_manager;

#[cfg(windows)]
mod loopback_bridge;
#[cfg(windows)]
mod standalone;

pub use windows_process_manager::{WindowsProcessHandle, WindowsProcessManager};

#[cfg(windows)]
pub use loopback_bridge::LoopbackBridge;
#[cfg(windows)]
pub use standalone::Standalone;
