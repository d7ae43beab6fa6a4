mod unix_process_manager;

#[cfg(unix)]
mod socket_bridge;
#[cfg(unix)]
mod standalone;

pub use unix_process_manager::*;

#[cfg(unix)]
pub use socket_bridge::SocketPairBridge;
#[cfg(unix)]
pub use standalone::Standalone;
