//! Scripted in-memory link for protocol tests.
//!
//! Tests pre-load the byte stream a dongle would produce and inspect what
//! the engine wrote, so request/response flows run without hardware.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::error::BgError;
use crate::link::Link;
use crate::protocol::{LENGTH_HIGH_MASK, MESSAGE_TYPE_BIT};

#[derive(Default)]
struct ScriptState {
    incoming: VecDeque<u8>,
    written: Vec<Vec<u8>>,
}

/// A [`Link`] backed by an in-memory queue. Clones share the same state, so
/// a test can keep a handle while the engine owns another.
#[derive(Clone, Default)]
pub struct ScriptedLink {
    state: Rc<RefCell<ScriptState>>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the inbound stream.
    pub fn queue(&self, bytes: &[u8]) {
        self.state.borrow_mut().incoming.extend(bytes.iter().copied());
    }

    /// All writes performed so far, one entry per `write_all` call.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.borrow().written.clone()
    }

    /// Bytes queued but not yet consumed.
    pub fn remaining(&self) -> usize {
        self.state.borrow().incoming.len()
    }
}

impl Link for ScriptedLink {
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, BgError> {
        if let Some(byte) = self.state.borrow_mut().incoming.pop_front() {
            return Ok(Some(byte));
        }
        // Idle like a real port would, without spinning the pump loop hot.
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        Ok(None)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BgError> {
        self.state.borrow_mut().written.push(bytes.to_vec());
        Ok(())
    }
}

fn frame(type_byte: u8, class_id: u8, message_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + payload.len());
    bytes.push(type_byte | (((payload.len() >> 8) as u8) & LENGTH_HIGH_MASK));
    bytes.push((payload.len() & 0xFF) as u8);
    bytes.push(class_id);
    bytes.push(message_id);
    bytes.extend_from_slice(payload);
    bytes
}

/// Encode a Bluetooth response frame as the dongle would emit it.
pub fn response_frame(class_id: u8, message_id: u8, payload: &[u8]) -> Vec<u8> {
    frame(0x00, class_id, message_id, payload)
}

/// Encode a Bluetooth event frame as the dongle would emit it.
pub fn event_frame(class_id: u8, message_id: u8, payload: &[u8]) -> Vec<u8> {
    frame(MESSAGE_TYPE_BIT, class_id, message_id, payload)
}
