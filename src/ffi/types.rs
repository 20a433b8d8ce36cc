//! C-compatible types shared with foreign callers

use std::ffi::{c_char, c_void};

use crate::record::RecordHeader;
use crate::stats::StatsSnapshot;

pub const FB_KEEP_GOING_CONTINUE: u32 = 0;
pub const FB_KEEP_GOING_STOP: u32 = 1;

pub const FB_EXCEPTION_RESTART: u32 = 0;
pub const FB_EXCEPTION_STOP: u32 = 1;

/// Record header as seen by record callbacks
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FbRecordHeader {
    /// Total record length in 4-byte words, header included
    pub length: u8,
    pub rtype: u8,
    pub publisher_id: u16,
    pub instrument_id: u32,
    pub ts_event: u64,
}

impl From<&RecordHeader> for FbRecordHeader {
    fn from(hd: &RecordHeader) -> Self {
        FbRecordHeader {
            length: hd.length,
            rtype: hd.rtype,
            publisher_id: hd.publisher_id,
            instrument_id: hd.instrument_id,
            ts_event: hd.ts_event,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FbSessionStats {
    pub records: u64,
    pub bytes: u64,
    pub events: u64,
    pub heartbeats: u64,
    pub dispatch_errors: u64,
    pub callback_faults: u64,
    pub restarts: u64,
    pub starts: u64,
    pub records_per_sec: f64,
}

impl From<StatsSnapshot> for FbSessionStats {
    fn from(s: StatsSnapshot) -> Self {
        FbSessionStats {
            records: s.records,
            bytes: s.bytes,
            events: s.events,
            heartbeats: s.heartbeats,
            dispatch_errors: s.dispatch_errors,
            callback_faults: s.callback_faults,
            restarts: s.restarts,
            starts: s.starts,
            records_per_sec: s.records_per_sec,
        }
    }
}

// Callbacks use the unwinding ABI so a panic raised inside one can be caught
// on our side of the boundary.

/// Receives the header and a pointer to the body bytes that follow it.
/// Returns `FB_KEEP_GOING_*`; any value other than continue stops.
pub type FbRecordCallback = extern "C-unwind" fn(
    user_data: *mut c_void,
    header: *const FbRecordHeader,
    body: *const u8,
    body_len: usize,
) -> u32;

/// Receives session metadata as a JSON document
pub type FbMetadataCallback = extern "C-unwind" fn(user_data: *mut c_void, metadata_json: *const c_char);

/// Receives the fault message. Returns `FB_EXCEPTION_*`; any value other
/// than restart stops.
pub type FbExceptionCallback = extern "C-unwind" fn(user_data: *mut c_void, message: *const c_char) -> u32;

/// Receives one routed event. `kind` is one of "mapping", "trade", "system",
/// "error" or "unknown".
pub type FbEventCallback = extern "C-unwind" fn(
    user_data: *mut c_void,
    kind: *const c_char,
    instrument_id: u32,
    symbol: *const c_char,
    text: *const c_char,
);
