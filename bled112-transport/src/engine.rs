//! The BGAPI engine.
//!
//! Owns the serial link and the frame decoder, routes decoded frames to
//! typed event counters and engine state, and exposes one synchronous
//! request/response helper per BGAPI command the Myo path uses. All parsing
//! and state mutation happens on whichever thread pumps reads; the bounded
//! serial read is the only suspension point.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::BgError;
use crate::event::{BgEvent, EventCounters};
use crate::frame::{Frame, FrameDecoder, MessageKind, Technology};
use crate::link::{Link, SerialConfig, SerialLink};
use crate::protocol::{
    self, class, cmd, evt, result, GapConnectableMode, GapDiscoverMode, GapDiscoverableMode,
};
use crate::types::{
    AddressType, AttributeInfo, Connection, DeviceAddress, ScanResult, ServiceRange,
};

/// Default deadline for a command's response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Receives attribute notifications and read results: `(handle, value)`.
pub type NotificationSink = Box<dyn FnMut(u16, &[u8])>;

/// Decides which scan responses are worth keeping.
pub type AdvertFilter = Box<dyn Fn(&ScanResult) -> bool>;

pub struct BgapiEngine {
    link: Box<dyn Link>,
    decoder: FrameDecoder,
    counters: EventCounters,
    packet_mode: bool,
    response_timeout: Duration,

    connection: Option<Connection>,
    services: Vec<ServiceRange>,
    attributes: Vec<AttributeInfo>,
    scan_results: Vec<ScanResult>,
    disconnecting: bool,
    last_response_result: u16,
    last_connect_handle: u8,

    advert_filter: Option<AdvertFilter>,
    notification_sink: Option<NotificationSink>,
}

impl BgapiEngine {
    pub fn new(link: Box<dyn Link>, packet_mode: bool) -> Self {
        Self {
            link,
            decoder: FrameDecoder::new(),
            counters: EventCounters::new(),
            packet_mode,
            response_timeout: RESPONSE_TIMEOUT,
            connection: None,
            services: Vec::new(),
            attributes: Vec::new(),
            scan_results: Vec::new(),
            disconnecting: false,
            last_response_result: 0,
            last_connect_handle: 0,
            advert_filter: None,
            notification_sink: None,
        }
    }

    /// Open the dongle at `path` and build an engine on top of it.
    pub fn open(path: &str, config: &SerialConfig) -> Result<Self, BgError> {
        let link = SerialLink::open(path, config)?;
        Ok(Self::new(Box::new(link), config.packet_mode()))
    }

    /// Override the per-command response deadline.
    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    /// Install the scan-response filter. Only matching advertisements are
    /// kept in the discovery list; without a filter everything is kept.
    pub fn set_advert_filter(&mut self, filter: impl Fn(&ScanResult) -> bool + 'static) {
        self.advert_filter = Some(Box::new(filter));
    }

    /// Install the consumer for attribute notifications and read values.
    pub fn set_notification_sink(&mut self, sink: impl FnMut(u16, &[u8]) + 'static) {
        self.notification_sink = Some(Box::new(sink));
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn services(&self) -> &[ServiceRange] {
        &self.services
    }

    pub fn attributes(&self) -> &[AttributeInfo] {
        &self.attributes
    }

    pub fn scan_results(&self) -> &[ScanResult] {
        &self.scan_results
    }

    /// Forget previous scan results; called when a new scan begins.
    pub fn clear_scan_results(&mut self) {
        self.scan_results.clear();
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting
    }

    /// Unconsumed fire count for `event`.
    pub fn pending(&self, event: BgEvent) -> u32 {
        self.counters.pending(event)
    }

    // ------------------------------------------------------------------
    // Pumping
    // ------------------------------------------------------------------

    /// Pump reads until `event` fires or `timeout` expires. A pending
    /// (unconsumed) occurrence satisfies the wait immediately. Exactly one
    /// occurrence is consumed on success, none on timeout.
    pub fn read_until(&mut self, event: BgEvent, timeout: Duration) -> Result<bool, BgError> {
        if self.counters.take(event) {
            return Ok(true);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            if let Some(byte) = self.link.read_byte(deadline - now)? {
                if let Some(frame) = self.decoder.push(byte) {
                    self.dispatch(frame)?;
                    if self.counters.take(event) {
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Pump reads for the full `duration`, dispatching every frame that
    /// arrives. Timeouts are the normal idle case, not errors.
    pub fn pump(&mut self, duration: Duration) -> Result<(), BgError> {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            if let Some(byte) = self.link.read_byte(deadline - now)? {
                if let Some(frame) = self.decoder.push(byte) {
                    self.dispatch(frame)?;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Request/response helpers
    // ------------------------------------------------------------------

    fn send(&mut self, packet: Vec<u8>) -> Result<(), BgError> {
        let packet = if self.packet_mode {
            let mut prefixed = Vec::with_capacity(packet.len() + 1);
            prefixed.push((packet.len() & 0xFF) as u8);
            prefixed.extend_from_slice(&packet);
            prefixed
        } else {
            packet
        };
        debug!("=> {:02X?}", packet);
        self.link.write_all(&packet)
    }

    fn await_response(&mut self, event: BgEvent) -> Result<(), BgError> {
        if self.read_until(event, self.response_timeout)? {
            Ok(())
        } else {
            Err(BgError::Timeout(event))
        }
    }

    /// Configure GAP discoverability/connectability.
    pub fn send_gap_set_mode(
        &mut self,
        discover: GapDiscoverableMode,
        connect: GapConnectableMode,
    ) -> Result<(), BgError> {
        self.send(protocol::gap_set_mode(discover, connect))?;
        self.await_response(BgEvent::RspGapSetMode)
    }

    /// Start a scan in the given discover mode.
    pub fn send_gap_discover(&mut self, mode: GapDiscoverMode) -> Result<(), BgError> {
        self.send(protocol::gap_discover(mode))?;
        self.await_response(BgEvent::RspGapDiscover)
    }

    /// End the current GAP procedure. A non-zero result (nothing was
    /// running) is tolerated.
    pub fn send_gap_end_procedure(&mut self) -> Result<(), BgError> {
        self.send(protocol::gap_end_procedure())?;
        self.await_response(BgEvent::RspGapEndProcedure)
    }

    /// Start a direct connection. Returns the pending connection handle;
    /// the caller must then wait for the `connection_status` event.
    pub fn send_gap_connect_direct(
        &mut self,
        address: DeviceAddress,
        address_type: AddressType,
        conn_interval_min: u16,
        conn_interval_max: u16,
        timeout: u16,
        latency: u16,
    ) -> Result<u8, BgError> {
        let atype = match address_type {
            AddressType::Public => 0,
            AddressType::Random => 1,
        };
        self.send(protocol::gap_connect_direct(
            &address.raw,
            atype,
            conn_interval_min,
            conn_interval_max,
            timeout,
            latency,
        ))?;
        self.await_response(BgEvent::RspGapConnectDirect)?;
        Ok(self.last_connect_handle)
    }

    /// Ask the dongle to disconnect `handle`. Returns true when a
    /// disconnect procedure actually started, in which case the caller must
    /// wait for `connection_disconnected`.
    pub fn send_connection_disconnect(&mut self, handle: u8) -> Result<bool, BgError> {
        self.send(protocol::connection_disconnect(handle))?;
        self.await_response(BgEvent::RspConnectionDisconnect)?;
        Ok(self.last_response_result == result::SUCCESS)
    }

    /// Enumerate services of a group type over a handle range. Results
    /// accumulate via `group_found` events; the caller waits for
    /// `procedure_completed`.
    pub fn send_attclient_read_by_group_type(
        &mut self,
        connection: u8,
        start: u16,
        end: u16,
        uuid: &[u8],
    ) -> Result<(), BgError> {
        self.send(protocol::attclient_read_by_group_type(
            connection, start, end, uuid,
        ))?;
        self.await_response(BgEvent::RspAttclientReadByGroupType)
    }

    /// Enumerate attributes in a handle range. Results accumulate via
    /// `find_information_found` events; the caller waits for
    /// `procedure_completed`.
    pub fn send_attclient_find_information(
        &mut self,
        connection: u8,
        start: u16,
        end: u16,
    ) -> Result<(), BgError> {
        self.send(protocol::attclient_find_information(connection, start, end))?;
        self.await_response(BgEvent::RspAttclientFindInformation)
    }

    /// Write an attribute value. The response confirms acceptance; the
    /// remote acknowledgment arrives as `procedure_completed`.
    pub fn send_attclient_attribute_write(
        &mut self,
        connection: u8,
        handle: u16,
        data: &[u8],
    ) -> Result<(), BgError> {
        self.send(protocol::attclient_attribute_write(connection, handle, data))?;
        self.await_response(BgEvent::RspAttclientAttributeWrite)
    }

    /// Read an attribute by handle; the value arrives as an
    /// `attribute_value` event.
    pub fn send_attclient_read_by_handle(
        &mut self,
        connection: u8,
        handle: u16,
    ) -> Result<(), BgError> {
        self.send(protocol::attclient_read_by_handle(connection, handle))?;
        self.await_response(BgEvent::RspAttclientReadByHandle)
    }

    // ------------------------------------------------------------------
    // Frame dispatch
    // ------------------------------------------------------------------

    fn dispatch(&mut self, frame: Frame) -> Result<(), BgError> {
        if frame.header.tech == Technology::Wifi {
            debug!("discarding wifi frame (class 0x{:02X})", frame.header.class_id);
            return Ok(());
        }
        match frame.header.kind {
            MessageKind::Response => self.dispatch_response(&frame),
            MessageKind::Event => self.dispatch_event(&frame),
        }
    }

    fn dispatch_response(&mut self, frame: &Frame) -> Result<(), BgError> {
        let p = &frame.payload;
        match (frame.header.class_id, frame.header.message_id) {
            (class::CONNECTION, cmd::CONNECTION_DISCONNECT) => {
                let (conn, res) = match conn_result(p) {
                    Some(v) => v,
                    None => return short_payload(frame),
                };
                self.last_response_result = res;
                if res == result::SUCCESS {
                    debug!("disconnect procedure started for connection {conn}");
                    self.disconnecting = true;
                } else {
                    debug!("no disconnect started for connection {conn} (result 0x{res:04X})");
                }
                self.counters.fire(BgEvent::RspConnectionDisconnect);
            }
            (class::ATTCLIENT, cmd::ATTCLIENT_READ_BY_GROUP_TYPE) => {
                let (_, res) = match conn_result(p) {
                    Some(v) => v,
                    None => return short_payload(frame),
                };
                self.last_response_result = res;
                self.counters.fire(BgEvent::RspAttclientReadByGroupType);
            }
            (class::ATTCLIENT, cmd::ATTCLIENT_FIND_INFORMATION) => {
                let (_, res) = match conn_result(p) {
                    Some(v) => v,
                    None => return short_payload(frame),
                };
                self.last_response_result = res;
                if res != result::SUCCESS {
                    return Err(BgError::CommandFailed {
                        command: "attclient_find_information",
                        result: res,
                    });
                }
                self.counters.fire(BgEvent::RspAttclientFindInformation);
            }
            (class::ATTCLIENT, cmd::ATTCLIENT_ATTRIBUTE_WRITE) => {
                let (_, res) = match conn_result(p) {
                    Some(v) => v,
                    None => return short_payload(frame),
                };
                self.last_response_result = res;
                if res != result::SUCCESS {
                    return Err(BgError::CommandFailed {
                        command: "attclient_attribute_write",
                        result: res,
                    });
                }
                self.counters.fire(BgEvent::RspAttclientAttributeWrite);
            }
            (class::ATTCLIENT, cmd::ATTCLIENT_READ_BY_HANDLE) => {
                let (_, res) = match conn_result(p) {
                    Some(v) => v,
                    None => return short_payload(frame),
                };
                self.last_response_result = res;
                if res != result::SUCCESS {
                    return Err(BgError::CommandFailed {
                        command: "attclient_read_by_handle",
                        result: res,
                    });
                }
                self.counters.fire(BgEvent::RspAttclientReadByHandle);
            }
            (class::GAP, cmd::GAP_SET_MODE) => {
                let res = match result_only(p) {
                    Some(v) => v,
                    None => return short_payload(frame),
                };
                self.last_response_result = res;
                if res != result::SUCCESS {
                    return Err(BgError::CommandFailed {
                        command: "gap_set_mode",
                        result: res,
                    });
                }
                self.counters.fire(BgEvent::RspGapSetMode);
            }
            (class::GAP, cmd::GAP_DISCOVER) => {
                let res = match result_only(p) {
                    Some(v) => v,
                    None => return short_payload(frame),
                };
                self.last_response_result = res;
                if res != result::SUCCESS {
                    return Err(BgError::CommandFailed {
                        command: "gap_discover",
                        result: res,
                    });
                }
                self.counters.fire(BgEvent::RspGapDiscover);
            }
            (class::GAP, cmd::GAP_CONNECT_DIRECT) => {
                if p.len() < 3 {
                    return short_payload(frame);
                }
                let res = u16::from_le_bytes([p[0], p[1]]);
                self.last_response_result = res;
                if res != result::SUCCESS {
                    return Err(BgError::CommandFailed {
                        command: "gap_connect_direct",
                        result: res,
                    });
                }
                self.last_connect_handle = p[2];
                self.counters.fire(BgEvent::RspGapConnectDirect);
            }
            (class::GAP, cmd::GAP_END_PROCEDURE) => {
                let res = match result_only(p) {
                    Some(v) => v,
                    None => return short_payload(frame),
                };
                self.last_response_result = res;
                if res != result::SUCCESS {
                    debug!("gap_end_procedure with nothing running (result 0x{res:04X})");
                }
                self.counters.fire(BgEvent::RspGapEndProcedure);
            }
            _ => {
                debug!(
                    "ignoring response class 0x{:02X} msg 0x{:02X}",
                    frame.header.class_id, frame.header.message_id
                );
            }
        }
        Ok(())
    }

    fn dispatch_event(&mut self, frame: &Frame) -> Result<(), BgError> {
        let p = &frame.payload;
        match (frame.header.class_id, frame.header.message_id) {
            (class::CONNECTION, evt::CONNECTION_STATUS) => {
                if p.len() < 16 {
                    return short_payload(frame);
                }
                let connection = Connection {
                    handle: p[0],
                    flags: p[1],
                    address: DeviceAddress::new([p[2], p[3], p[4], p[5], p[6], p[7]]),
                    address_type: AddressType::from_u8(p[8]),
                    interval: u16::from_le_bytes([p[9], p[10]]),
                    timeout: u16::from_le_bytes([p[11], p[12]]),
                    latency: u16::from_le_bytes([p[13], p[14]]),
                    bonding: p[15],
                };
                info!(
                    "connected to {} (handle {}, interval {}, timeout {}, latency {})",
                    connection.address,
                    connection.handle,
                    connection.interval,
                    connection.timeout,
                    connection.latency
                );
                self.connection = Some(connection);
                self.counters.fire(BgEvent::EvtConnectionStatus);
            }
            (class::CONNECTION, evt::CONNECTION_DISCONNECTED) => {
                if p.len() < 3 {
                    return short_payload(frame);
                }
                let handle = p[0];
                let reason = u16::from_le_bytes([p[1], p[2]]);
                let ours = self
                    .connection
                    .as_ref()
                    .map_or(true, |c| c.handle == handle);
                if ours {
                    match reason {
                        result::DISCONNECT_LOCAL_HOST => {
                            info!("connection {handle} closed by local host")
                        }
                        result::DISCONNECT_SUPERVISION_TIMEOUT => {
                            warn!("connection {handle} lost: supervision timeout")
                        }
                        other => warn!("connection {handle} closed (reason 0x{other:04X})"),
                    }
                    self.disconnecting = false;
                    self.connection = None;
                    self.services.clear();
                    self.attributes.clear();
                    self.counters.fire(BgEvent::EvtConnectionDisconnected);
                }
            }
            (class::ATTCLIENT, evt::ATTCLIENT_PROCEDURE_COMPLETED) => {
                if p.len() < 5 {
                    return short_payload(frame);
                }
                let conn = p[0];
                if self.connection_matches(conn) {
                    let res = u16::from_le_bytes([p[1], p[2]]);
                    let chrhandle = u16::from_le_bytes([p[3], p[4]]);
                    self.counters.fire(BgEvent::EvtAttclientProcedureCompleted);
                    if res != result::SUCCESS {
                        return Err(BgError::ProcedureFailed {
                            result: res,
                            handle: chrhandle,
                        });
                    }
                }
            }
            (class::ATTCLIENT, evt::ATTCLIENT_GROUP_FOUND) => {
                if p.len() < 6 {
                    return short_payload(frame);
                }
                let conn = p[0];
                if self.connection_matches(conn) {
                    let range = ServiceRange {
                        start: u16::from_le_bytes([p[1], p[2]]),
                        end: u16::from_le_bytes([p[3], p[4]]),
                        uuid: p[6..].to_vec(),
                    };
                    debug!(
                        "service 0x{:04X}..0x{:04X} uuid {:02X?}",
                        range.start, range.end, range.uuid
                    );
                    self.services.push(range);
                    self.counters.fire(BgEvent::EvtAttclientGroupFound);
                }
            }
            (class::ATTCLIENT, evt::ATTCLIENT_FIND_INFORMATION_FOUND) => {
                if p.len() < 4 {
                    return short_payload(frame);
                }
                let conn = p[0];
                if self.connection_matches(conn) {
                    let info = AttributeInfo {
                        handle: u16::from_le_bytes([p[1], p[2]]),
                        uuid: p[4..].to_vec(),
                    };
                    self.attributes.push(info);
                    self.counters.fire(BgEvent::EvtAttclientFindInformationFound);
                }
            }
            (class::ATTCLIENT, evt::ATTCLIENT_ATTRIBUTE_VALUE) => {
                if p.len() < 5 {
                    return short_payload(frame);
                }
                let conn = p[0];
                if self.connection_matches(conn) {
                    let handle = u16::from_le_bytes([p[1], p[2]]);
                    let value = &p[5..];
                    self.counters.fire(BgEvent::EvtAttclientAttributeValue);
                    if let Some(sink) = self.notification_sink.as_mut() {
                        sink(handle, value);
                    }
                }
            }
            (class::GAP, evt::GAP_SCAN_RESPONSE) => {
                if p.len() < 11 {
                    return short_payload(frame);
                }
                let scan = ScanResult {
                    rssi: p[0] as i8,
                    address: DeviceAddress::new([p[2], p[3], p[4], p[5], p[6], p[7]]),
                    address_type: AddressType::from_u8(p[8]),
                    data: p[11..].to_vec(),
                };
                self.counters.fire(BgEvent::EvtGapScanResponse);
                let keep = self.advert_filter.as_ref().map_or(true, |f| f(&scan));
                if keep && !self.seen(&scan) {
                    debug!("scan hit: {} (rssi {} dBm)", scan.address, scan.rssi);
                    self.scan_results.push(scan);
                }
            }
            (class::GAP, evt::GAP_MODE_CHANGED) => {}
            _ => {
                debug!(
                    "ignoring event class 0x{:02X} msg 0x{:02X}",
                    frame.header.class_id, frame.header.message_id
                );
            }
        }
        Ok(())
    }

    fn connection_matches(&self, handle: u8) -> bool {
        self.connection.as_ref().is_some_and(|c| c.handle == handle)
    }

    fn seen(&self, scan: &ScanResult) -> bool {
        self.scan_results
            .iter()
            .any(|r| r.address == scan.address && r.address_type == scan.address_type)
    }
}

fn conn_result(payload: &[u8]) -> Option<(u8, u16)> {
    if payload.len() < 3 {
        return None;
    }
    Some((payload[0], u16::from_le_bytes([payload[1], payload[2]])))
}

fn result_only(payload: &[u8]) -> Option<u16> {
    if payload.len() < 2 {
        return None;
    }
    Some(u16::from_le_bytes([payload[0], payload[1]]))
}

fn short_payload(frame: &Frame) -> Result<(), BgError> {
    warn!(
        "truncated payload for class 0x{:02X} msg 0x{:02X} ({} bytes)",
        frame.header.class_id,
        frame.header.message_id,
        frame.payload.len()
    );
    Ok(())
}
