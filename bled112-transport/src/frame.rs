//! Inbound frame model and the byte-fed decoder state machine.

use tracing::trace;

use crate::protocol::{
    HEADER_LEN, LENGTH_HIGH_MASK, MESSAGE_TYPE_BIT, TECH_BLUETOOTH, TECH_MASK, TECH_SHIFT,
    TECH_WIFI,
};

/// Whether a frame is a command/response or an asynchronous event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Response,
    Event,
}

/// Radio technology a frame belongs to. The BLED112 only ever produces
/// Bluetooth frames; Wi-Fi frames are decoded and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technology {
    Bluetooth,
    Wifi,
}

/// Decoded four-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: MessageKind,
    pub tech: Technology,
    pub class_id: u8,
    pub message_id: u8,
    pub payload_len: u16,
}

/// A complete inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Classify a leading byte. Returns `None` for bytes that cannot start a
/// frame (unknown technology bits), which the decoder drops while idle.
fn classify(byte: u8) -> Option<(MessageKind, Technology)> {
    let kind = if byte & MESSAGE_TYPE_BIT != 0 {
        MessageKind::Event
    } else {
        MessageKind::Response
    };
    let tech = match (byte >> TECH_SHIFT) & TECH_MASK {
        TECH_BLUETOOTH => Technology::Bluetooth,
        TECH_WIFI => Technology::Wifi,
        _ => return None,
    };
    Some((kind, tech))
}

/// Byte-fed BGAPI frame decoder.
///
/// Three states: idle (empty buffer), header byte 0 seen, accumulating until
/// `expected` bytes are buffered. A frame is produced exactly when the
/// buffer reaches the expected length, and the buffer is fully consumed by
/// that dispatch.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    expected: usize,
    kind: Option<(MessageKind, Technology)>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected = 0;
        self.kind = None;
    }

    /// Feed one byte. Returns a frame once the final byte of one arrives.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        if self.buf.is_empty() {
            match classify(byte) {
                Some(kind) => {
                    self.kind = Some(kind);
                    self.buf.push(byte);
                }
                None => trace!("dropping noise byte 0x{byte:02X}"),
            }
            return None;
        }

        self.buf.push(byte);
        if self.buf.len() == 2 {
            self.expected =
                HEADER_LEN + (((self.buf[0] & LENGTH_HIGH_MASK) as usize) << 8) + self.buf[1] as usize;
        }

        if self.buf.len() < self.expected {
            return None;
        }

        let Some((kind, tech)) = self.kind.take() else {
            self.reset();
            return None;
        };
        let header = FrameHeader {
            kind,
            tech,
            class_id: self.buf[2],
            message_id: self.buf[3],
            payload_len: (self.expected - HEADER_LEN) as u16,
        };
        let payload = self.buf.split_off(HEADER_LEN);
        trace!(
            "<= class 0x{:02X} msg 0x{:02X} ({} payload bytes)",
            header.class_id,
            header.message_id,
            payload.len()
        );
        self.buf.clear();
        self.expected = 0;
        Some(Frame { header, payload })
    }
}
