//! Serial transport for the BLED112.
//!
//! The dongle enumerates as a USB-CDC character device. The [`Link`] trait
//! is the seam between the engine and the byte stream; production code uses
//! [`SerialLink`], tests use the scripted link in [`crate::testing`].

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use tracing::debug;

use crate::error::BgError;

/// Byte-level transport: bounded single-byte reads, blocking writes.
pub trait Link {
    /// Read one byte, waiting at most `timeout`. Returns `Ok(None)` when the
    /// deadline expires with nothing to read.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, BgError>;

    /// Write the whole buffer.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BgError>;
}

/// Serial line configuration. The BLED112 speaks 115200 8N1; RTS/CTS flow
/// control is on by default, and the BGAPI packet-mode length prefix is
/// required exactly when flow control is off.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub flow_control: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            flow_control: true,
        }
    }
}

impl SerialConfig {
    /// Whether outbound commands need the single-byte length prefix.
    pub fn packet_mode(&self) -> bool {
        !self.flow_control
    }
}

/// A [`Link`] over a real serial port.
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink {
    /// Open the character device at `path` with the given configuration.
    pub fn open(path: &str, config: &SerialConfig) -> Result<Self, BgError> {
        let flow = if config.flow_control {
            serialport::FlowControl::Hardware
        } else {
            serialport::FlowControl::None
        };
        let port = serialport::new(path, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(flow)
            .timeout(Duration::from_millis(100))
            .open()?;
        debug!("opened {path} at {} baud (flow control: {flow:?})", config.baud_rate);
        Ok(Self { port })
    }
}

impl Link for SerialLink {
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, BgError> {
        // A zero timeout would make some platform backends block forever.
        self.port
            .set_timeout(timeout.max(Duration::from_millis(1)))?;
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(BgError::Io(e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BgError> {
        self.port.write_all(bytes)?;
        Ok(())
    }
}
