use crate::endpoint::Endpoint;
use crate::error::TetherError;

/// Endpoint pair produced by a bridge
#[derive(Debug)]
pub struct BridgePair {
    /// Side kept by the controller
    pub controller: Endpoint,
    /// Side handed to the child as its standard streams
    pub child: Endpoint,
}

/// Produces two mutually connected endpoints.
///
/// Implementations must not leave any listening socket behind, and must close every
/// endpoint they created before returning an error.
pub trait Bridge: Send + Sync {
    fn bridge(&self) -> Result<BridgePair, TetherError>;
}

impl<B: Bridge + ?Sized> Bridge for std::sync::Arc<B> {
    fn bridge(&self) -> Result<BridgePair, TetherError> {
        (**self).bridge()
    }
}

impl<B: Bridge + ?Sized> Bridge for Box<B> {
    fn bridge(&self) -> Result<BridgePair, TetherError> {
        (**self).bridge()
    }
}
