//! BGAPI protocol engine for the Silicon Labs BLED112 dongle.
//!
//! The BLED112 is a USB BLE controller that speaks BGAPI, a length-prefixed
//! binary command/response/event protocol, over a 115200 8N1 serial line.
//! This crate provides the pieces a GATT client needs on top of it:
//!
//! - [`frame`] — frame layout and the byte-fed decoder state machine
//! - [`protocol`] — wire constants and outbound command builders
//! - [`link`] — the serial transport and the [`Link`] seam
//! - [`event`] — typed event identifiers with fire counters
//! - [`engine`] — request/response correlation, GAP/GATT state, dispatch
//!
//! The engine is single-threaded and cooperative: frames are parsed and
//! dispatched on whichever thread calls a read-pumping operation, and the
//! bounded serial read is the only suspension point. Device-specific
//! behavior (which advertisements matter, what notifications mean) is
//! injected through the advertisement filter and notification sink.

pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod link;
pub mod protocol;
pub mod testing;
pub mod types;

pub use engine::{BgapiEngine, RESPONSE_TIMEOUT};
pub use error::BgError;
pub use event::BgEvent;
pub use frame::{Frame, FrameDecoder, FrameHeader, MessageKind, Technology};
pub use link::{Link, SerialConfig, SerialLink};
pub use protocol::{GapConnectableMode, GapDiscoverMode, GapDiscoverableMode};
pub use types::{
    AddressType, AttributeInfo, Connection, DeviceAddress, ScanResult, ServiceRange,
};
