//! Buffered byte channel over a raw duplex stream.

mod buffered;
mod transport;

pub use buffered::BufferedChannel;
pub use transport::{QueuedTransport, Transport};
