//! Errors raised while assembling the sync runtime

use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// A host bridge the engine needs has no implementation
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// A default bridge failed to initialize
    #[error("Bridge setup failed: {0}")]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, Error>;
