//! Tether - spawn programs locally, in containers, in multiplexer panes or behind any
//! command executor, with a live byte channel to the target that survives the spawn.
//!
//! The platform strategy (socket pair on Unix, loopback duplication on Windows) is chosen
//! at compile time; everything else is platform-agnostic and lives in `tether-core`.

pub mod launchers;
pub mod logging;
pub mod monitor;
pub mod tcp;
pub mod wrappers;

mod factory;

#[cfg(test)]
pub(crate) mod testing;

pub use factory::{PlatformBridge, PlatformStandalone, launch, platform_bridge, platform_name};

// Re-export core functionality
pub use tether_core::*;
