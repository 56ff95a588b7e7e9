//! Data types shared by the engine and its consumers.

use std::fmt;

use serde::Serialize;

/// Bluetooth device address type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Public,
    Random,
}

impl AddressType {
    pub fn from_u8(value: u8) -> Self {
        if value == 0 {
            Self::Public
        } else {
            Self::Random
        }
    }
}

/// Six-byte device address, stored in the little-endian byte order the
/// dongle delivers it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub raw: [u8; 6],
}

impl DeviceAddress {
    pub fn new(raw: [u8; 6]) -> Self {
        Self { raw }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Conventional MAC notation is most-significant byte first.
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.raw[5], self.raw[4], self.raw[3], self.raw[2], self.raw[1], self.raw[0]
        )
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One advertisement heard during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub address: DeviceAddress,
    pub address_type: AddressType,
    /// Received signal strength in dBm.
    pub rssi: i8,
    /// Raw advertisement payload.
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Connection status flag bits reported by `connection_status`.
pub mod connection_flags {
    pub const CONNECTED: u8 = 0x01;
    pub const ENCRYPTED: u8 = 0x02;
    pub const COMPLETED: u8 = 0x04;
    pub const PARAMETERS_CHANGE: u8 = 0x08;
}

/// An established connection as reported by the dongle.
#[derive(Debug, Clone)]
pub struct Connection {
    pub handle: u8,
    pub flags: u8,
    pub address: DeviceAddress,
    pub address_type: AddressType,
    /// Connection interval in 1.25 ms units.
    pub interval: u16,
    /// Supervision timeout in 10 ms units.
    pub timeout: u16,
    pub latency: u16,
    pub bonding: u8,
}

/// A primary-service handle range found during group-type discovery.
#[derive(Debug, Clone)]
pub struct ServiceRange {
    pub start: u16,
    pub end: u16,
    pub uuid: Vec<u8>,
}

/// An attribute handle and its UUID, as delivered on the wire
/// (little-endian byte order).
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub handle: u16,
    pub uuid: Vec<u8>,
}
