use std::os::unix::net::UnixStream;
use tether_core::{Bridge, BridgePair, Endpoint, TetherError};
use tracing::debug;

/// Native-pair bridge: one `socketpair(2)` call yields two connected endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketPairBridge;

impl Bridge for SocketPairBridge {
    fn bridge(&self) -> Result<BridgePair, TetherError> {
        let (controller, child) =
            UnixStream::pair().map_err(|e| TetherError::BridgeFailed(e.to_string()))?;

        let pair = BridgePair {
            controller: Endpoint::new(controller.into()),
            child: Endpoint::new(child.into()),
        };
        debug!(
            controller = ?pair.controller.raw_value(),
            child = ?pair.child.raw_value(),
            "Created socket pair"
        );
        Ok(pair)
    }
}
