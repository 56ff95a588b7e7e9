//! Typed event identifiers and per-event fire counters.
//!
//! Request/response correlation is built on these counters: the dispatcher
//! increments an event's count when its frame arrives, and `read_until`
//! consumes exactly one count per successful wait.

use std::fmt;

/// Every response and event the engine correlates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BgEvent {
    RspGapSetMode,
    RspGapDiscover,
    RspGapEndProcedure,
    RspGapConnectDirect,
    RspConnectionDisconnect,
    RspAttclientReadByGroupType,
    RspAttclientFindInformation,
    RspAttclientAttributeWrite,
    RspAttclientReadByHandle,
    EvtGapScanResponse,
    EvtConnectionStatus,
    EvtConnectionDisconnected,
    EvtAttclientGroupFound,
    EvtAttclientFindInformationFound,
    EvtAttclientProcedureCompleted,
    EvtAttclientAttributeValue,
}

impl BgEvent {
    pub const COUNT: usize = 16;

    pub fn name(self) -> &'static str {
        match self {
            Self::RspGapSetMode => "gap_set_mode response",
            Self::RspGapDiscover => "gap_discover response",
            Self::RspGapEndProcedure => "gap_end_procedure response",
            Self::RspGapConnectDirect => "gap_connect_direct response",
            Self::RspConnectionDisconnect => "connection_disconnect response",
            Self::RspAttclientReadByGroupType => "attclient_read_by_group_type response",
            Self::RspAttclientFindInformation => "attclient_find_information response",
            Self::RspAttclientAttributeWrite => "attclient_attribute_write response",
            Self::RspAttclientReadByHandle => "attclient_read_by_handle response",
            Self::EvtGapScanResponse => "gap_scan_response event",
            Self::EvtConnectionStatus => "connection_status event",
            Self::EvtConnectionDisconnected => "connection_disconnected event",
            Self::EvtAttclientGroupFound => "attclient_group_found event",
            Self::EvtAttclientFindInformationFound => "attclient_find_information_found event",
            Self::EvtAttclientProcedureCompleted => "attclient_procedure_completed event",
            Self::EvtAttclientAttributeValue => "attclient_attribute_value event",
        }
    }
}

impl fmt::Display for BgEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fire counts for every [`BgEvent`].
#[derive(Debug, Default)]
pub struct EventCounters {
    counts: [u32; BgEvent::COUNT],
}

impl EventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `event`.
    pub fn fire(&mut self, event: BgEvent) {
        self.counts[event as usize] += 1;
    }

    /// Occurrences recorded but not yet consumed.
    pub fn pending(&self, event: BgEvent) -> u32 {
        self.counts[event as usize]
    }

    /// Consume one occurrence if any is pending.
    pub fn take(&mut self, event: BgEvent) -> bool {
        let slot = &mut self.counts[event as usize];
        if *slot > 0 {
            *slot -= 1;
            true
        } else {
            false
        }
    }
}
