//! Controller error types.

use thiserror::Error;

use bled112_transport::BgError;

/// Errors produced by the Myo controller.
#[derive(Error, Debug)]
pub enum MyoError {
    #[error(transparent)]
    Transport(#[from] BgError),

    #[error("a connection is already active")]
    AlreadyConnected,

    #[error("no active connection")]
    NotConnected,

    #[error("required Myo characteristic missing: {0}")]
    MissingCharacteristic(&'static str),
}
