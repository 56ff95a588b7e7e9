//! Engine error types.

use thiserror::Error;

use crate::event::BgEvent;

/// Errors produced by the transport and protocol engine.
#[derive(Error, Debug)]
pub enum BgError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for {0}")]
    Timeout(BgEvent),

    #[error("{command} failed with result 0x{result:04X}")]
    CommandFailed {
        command: &'static str,
        result: u16,
    },

    #[error("attribute procedure failed with result 0x{result:04X} (handle 0x{handle:04X})")]
    ProcedureFailed { result: u16, handle: u16 },
}
