//! BGAPI wire constants and command builders.
//!
//! Numeric values follow the Bluegiga "Bluetooth Smart Software API Reference
//! Manual" (v1.7) for the BLED112 dongle. Only the command classes the Myo
//! streaming path needs are defined: connection (0x03), attribute client
//! (0x04) and GAP (0x06).

/// Fixed header length of every BGAPI frame.
pub const HEADER_LEN: usize = 4;

/// Maximum payload length expressible in the 11-bit length field.
pub const MAX_PAYLOAD: usize = 2047;

/// Message-type bit (byte 0, bit 7): 0 = command/response, 1 = event.
pub const MESSAGE_TYPE_BIT: u8 = 0x80;

/// Technology-type field (byte 0, bits 6:3): 0000 = Bluetooth Smart, 0001 = Wi-Fi.
pub const TECH_SHIFT: u8 = 3;
pub const TECH_MASK: u8 = 0x0F;
pub const TECH_BLUETOOTH: u8 = 0x00;
pub const TECH_WIFI: u8 = 0x01;

/// High bits of the payload length live in byte 0, bits 2:0.
pub const LENGTH_HIGH_MASK: u8 = 0x07;

/// Command class IDs.
pub mod class {
    pub const CONNECTION: u8 = 0x03;
    pub const ATTCLIENT: u8 = 0x04;
    pub const GAP: u8 = 0x06;
}

/// Command message IDs, per class.
pub mod cmd {
    // class::CONNECTION
    pub const CONNECTION_DISCONNECT: u8 = 0x00;

    // class::ATTCLIENT
    pub const ATTCLIENT_READ_BY_GROUP_TYPE: u8 = 0x01;
    pub const ATTCLIENT_FIND_INFORMATION: u8 = 0x03;
    pub const ATTCLIENT_READ_BY_HANDLE: u8 = 0x04;
    pub const ATTCLIENT_ATTRIBUTE_WRITE: u8 = 0x05;

    // class::GAP
    pub const GAP_SET_MODE: u8 = 0x01;
    pub const GAP_DISCOVER: u8 = 0x02;
    pub const GAP_CONNECT_DIRECT: u8 = 0x03;
    pub const GAP_END_PROCEDURE: u8 = 0x04;
}

/// Event message IDs, per class. Events share numbering space with commands
/// but are distinguished by the message-type bit in the frame header.
pub mod evt {
    // class::CONNECTION
    pub const CONNECTION_STATUS: u8 = 0x00;
    pub const CONNECTION_DISCONNECTED: u8 = 0x04;

    // class::ATTCLIENT
    pub const ATTCLIENT_PROCEDURE_COMPLETED: u8 = 0x01;
    pub const ATTCLIENT_GROUP_FOUND: u8 = 0x02;
    pub const ATTCLIENT_FIND_INFORMATION_FOUND: u8 = 0x04;
    pub const ATTCLIENT_ATTRIBUTE_VALUE: u8 = 0x05;

    // class::GAP
    pub const GAP_SCAN_RESPONSE: u8 = 0x00;
    pub const GAP_MODE_CHANGED: u8 = 0x01;
}

/// Result codes. Zero means success for every command; the disconnect
/// reasons below are the two the dongle produces in practice.
pub mod result {
    pub const SUCCESS: u16 = 0x0000;
    /// Disconnect reason: connection closed by the local host.
    pub const DISCONNECT_LOCAL_HOST: u16 = 0x0216;
    /// Disconnect reason: link supervision timeout (device out of range or off).
    pub const DISCONNECT_SUPERVISION_TIMEOUT: u16 = 0x0208;
}

/// GAP discoverable mode, for `gap_set_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GapDiscoverableMode {
    NonDiscoverable = 0,
    LimitedDiscoverable = 1,
    GeneralDiscoverable = 2,
    Broadcast = 3,
    UserData = 4,
}

/// GAP connectable mode, for `gap_set_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GapConnectableMode {
    NonConnectable = 0,
    DirectedConnectable = 1,
    UndirectedConnectable = 2,
    ScannableConnectable = 3,
}

/// GAP discover mode, for `gap_discover`. Observation mode receives all
/// advertisement packets without filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GapDiscoverMode {
    Limited = 0,
    Generic = 1,
    Observation = 2,
}

/// The 16-bit GATT primary-service group UUID (0x2800), little-endian as
/// sent on the wire.
pub const PRIMARY_SERVICE_UUID: [u8; 2] = [0x00, 0x28];

fn command(class_id: u8, message_id: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD);
    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.push(((payload.len() >> 8) as u8) & LENGTH_HIGH_MASK);
    packet.push((payload.len() & 0xFF) as u8);
    packet.push(class_id);
    packet.push(message_id);
    packet.extend_from_slice(payload);
    packet
}

/// Disconnect an active connection. Produces a `connection_disconnect`
/// response and, once the link is down, a `connection_disconnected` event.
pub fn connection_disconnect(connection: u8) -> Vec<u8> {
    command(class::CONNECTION, cmd::CONNECTION_DISCONNECT, &[connection])
}

/// Read attributes of a given group type in a handle range. Used for
/// primary-service discovery; results arrive as `group_found` events and the
/// procedure ends with `procedure_completed`.
pub fn attclient_read_by_group_type(connection: u8, start: u16, end: u16, uuid: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6 + uuid.len());
    payload.push(connection);
    payload.extend_from_slice(&start.to_le_bytes());
    payload.extend_from_slice(&end.to_le_bytes());
    payload.push(uuid.len() as u8);
    payload.extend_from_slice(uuid);
    command(class::ATTCLIENT, cmd::ATTCLIENT_READ_BY_GROUP_TYPE, &payload)
}

/// Discover attribute handles and their UUIDs in a handle range. Results
/// arrive as `find_information_found` events, completion as
/// `procedure_completed`.
pub fn attclient_find_information(connection: u8, start: u16, end: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5);
    payload.push(connection);
    payload.extend_from_slice(&start.to_le_bytes());
    payload.extend_from_slice(&end.to_le_bytes());
    command(class::ATTCLIENT, cmd::ATTCLIENT_FIND_INFORMATION, &payload)
}

/// Read a single attribute by handle. The value arrives as an
/// `attribute_value` event.
pub fn attclient_read_by_handle(connection: u8, handle: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(3);
    payload.push(connection);
    payload.extend_from_slice(&handle.to_le_bytes());
    command(class::ATTCLIENT, cmd::ATTCLIENT_READ_BY_HANDLE, &payload)
}

/// Write an attribute value on the remote device. The remote acknowledgment
/// arrives as a `procedure_completed` event.
pub fn attclient_attribute_write(connection: u8, handle: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + data.len());
    payload.push(connection);
    payload.extend_from_slice(&handle.to_le_bytes());
    payload.push(data.len() as u8);
    payload.extend_from_slice(data);
    command(class::ATTCLIENT, cmd::ATTCLIENT_ATTRIBUTE_WRITE, &payload)
}

/// Configure GAP discoverability and connectability.
pub fn gap_set_mode(discover: GapDiscoverableMode, connect: GapConnectableMode) -> Vec<u8> {
    command(class::GAP, cmd::GAP_SET_MODE, &[discover as u8, connect as u8])
}

/// Start scanning for advertising devices.
pub fn gap_discover(mode: GapDiscoverMode) -> Vec<u8> {
    command(class::GAP, cmd::GAP_DISCOVER, &[mode as u8])
}

/// Start a direct connection to a device. Intervals are in 1.25 ms units,
/// the supervision timeout in 10 ms units.
pub fn gap_connect_direct(
    address: &[u8; 6],
    address_type: u8,
    conn_interval_min: u16,
    conn_interval_max: u16,
    timeout: u16,
    latency: u16,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(15);
    payload.extend_from_slice(address);
    payload.push(address_type);
    payload.extend_from_slice(&conn_interval_min.to_le_bytes());
    payload.extend_from_slice(&conn_interval_max.to_le_bytes());
    payload.extend_from_slice(&timeout.to_le_bytes());
    payload.extend_from_slice(&latency.to_le_bytes());
    command(class::GAP, cmd::GAP_CONNECT_DIRECT, &payload)
}

/// End the running GAP procedure (scan or connection attempt). Safe to issue
/// when nothing is running.
pub fn gap_end_procedure() -> Vec<u8> {
    command(class::GAP, cmd::GAP_END_PROCEDURE, &[])
}
