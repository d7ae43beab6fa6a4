//! Tether Core - Platform-independent abstractions for spawning processes with a live
//! byte channel attached.
//!
//! This crate provides the executor, bridge and launcher traits, the session teardown
//! model, the buffered channel, and the configuration and error types shared by the
//! platform-specific implementations.

mod bridge;
mod config;
mod endpoint;
mod error;
mod executor;
mod launcher;
mod process;

pub mod channel;

pub use bridge::*;
pub use channel::{BufferedChannel, QueuedTransport, Transport};
pub use config::*;
pub use endpoint::*;
pub use error::*;
pub use executor::*;
pub use launcher::*;
pub use process::*;
