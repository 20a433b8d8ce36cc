//! Record layout for the live feed
//!
//! Fixed header: 16 bytes
//!   - length: u8 (1 byte) - total record length in 4-byte words, header included
//!   - rtype: u8 (1 byte) - runtime type tag
//!   - publisher_id: u16 (2 bytes)
//!   - instrument_id: u32 (4 bytes)
//!   - ts_event: u64 (8 bytes) - nanoseconds since the UNIX epoch
//!
//! All integers are little-endian. Fixed-width text fields are NUL padded.

use std::mem;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

pub const HEADER_SIZE: usize = 16;
pub const WORD_SIZE: usize = 4;

pub const SYMBOL_CSTR_LEN: usize = 71;
pub const SYSTEM_MSG_LEN: usize = 303;
pub const ERROR_MSG_LEN: usize = 302;

/// Code value meaning "not provided by the gateway".
pub const UNDEF_CODE: u8 = u8::MAX;

/// Fixed-point prices carry nine implied decimals.
pub const FIXED_PRICE_SCALE: f64 = 1e9;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RType {
    Mbp0 = 0x00,
    Mbp1 = 0x01,
    Mbp10 = 0x0A,
    Status = 0x12,
    InstrumentDef = 0x13,
    Imbalance = 0x14,
    Error = 0x15,
    SymbolMapping = 0x16,
    System = 0x17,
    Statistics = 0x18,
    Ohlcv1S = 0x20,
    Ohlcv1M = 0x21,
    Ohlcv1H = 0x22,
    Ohlcv1D = 0x23,
    OhlcvEod = 0x24,
    Mbo = 0xA0,
    Cmbp1 = 0xB1,
    Cbbo1S = 0xC0,
    Cbbo1M = 0xC1,
    Tcbbo = 0xC2,
    Bbo1S = 0xC3,
    Bbo1M = 0xC4,
}

impl RType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(RType::Mbp0),
            0x01 => Some(RType::Mbp1),
            0x0A => Some(RType::Mbp10),
            0x12 => Some(RType::Status),
            0x13 => Some(RType::InstrumentDef),
            0x14 => Some(RType::Imbalance),
            0x15 => Some(RType::Error),
            0x16 => Some(RType::SymbolMapping),
            0x17 => Some(RType::System),
            0x18 => Some(RType::Statistics),
            0x20 => Some(RType::Ohlcv1S),
            0x21 => Some(RType::Ohlcv1M),
            0x22 => Some(RType::Ohlcv1H),
            0x23 => Some(RType::Ohlcv1D),
            0x24 => Some(RType::OhlcvEod),
            0xA0 => Some(RType::Mbo),
            0xB1 => Some(RType::Cmbp1),
            0xC0 => Some(RType::Cbbo1S),
            0xC1 => Some(RType::Cbbo1M),
            0xC2 => Some(RType::Tcbbo),
            0xC3 => Some(RType::Bbo1S),
            0xC4 => Some(RType::Bbo1M),
            _ => None,
        }
    }
}

/// Record header: 16 bytes total
/// Laid out as: [length(1)][rtype(1)][publisher_id(2)][instrument_id(4)][ts_event(8)]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordHeader {
    pub length: u8,
    pub rtype: u8,
    pub publisher_id: u16,
    pub instrument_id: u32,
    pub ts_event: u64,
}

impl RecordHeader {
    pub fn new(rtype: RType, publisher_id: u16, instrument_id: u32, ts_event: u64) -> Self {
        RecordHeader {
            length: (HEADER_SIZE / WORD_SIZE) as u8,
            rtype: rtype as u8,
            publisher_id,
            instrument_id,
            ts_event,
        }
    }

    /// Record size in bytes as declared by the length field
    pub fn record_size(&self) -> usize {
        self.length as usize * WORD_SIZE
    }

    /// Read a header from the first 16 bytes of `buf`.
    /// Callers must check `buf.len() >= HEADER_SIZE`.
    pub fn read(buf: &[u8]) -> Self {
        RecordHeader {
            length: buf[0],
            rtype: buf[1],
            publisher_id: LittleEndian::read_u16(&buf[2..4]),
            instrument_id: LittleEndian::read_u32(&buf[4..8]),
            ts_event: LittleEndian::read_u64(&buf[8..16]),
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[0] = self.length;
        buf[1] = self.rtype;
        LittleEndian::write_u16(&mut buf[2..4], self.publisher_id);
        LittleEndian::write_u32(&mut buf[4..8], self.instrument_id);
        LittleEndian::write_u64(&mut buf[8..16], self.ts_event);
    }
}

/// A record kind with a fixed wire size.
///
/// `read_body` receives the bytes after the header and may assume at least
/// `SIZE - HEADER_SIZE` of them; the decoder checks this before calling it.
pub trait RecordMessage: Sized + Serialize {
    const RTYPE: RType;
    const SIZE: usize;

    fn header(&self) -> &RecordHeader;
    fn read_body(header: RecordHeader, body: &[u8]) -> Self;
    fn write_body(&self, body: &mut [u8]);

    /// Encode into wire bytes, fixing up the header length and rtype
    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        let mut hd = *self.header();
        hd.length = (Self::SIZE / WORD_SIZE) as u8;
        hd.rtype = Self::RTYPE as u8;
        hd.write(&mut buf[..HEADER_SIZE]);
        self.write_body(&mut buf[HEADER_SIZE..]);
        buf
    }
}

/// Trade execution
/// Total: 16 (header) + 32 = 48 bytes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeMsg {
    pub hd: RecordHeader,
    pub price: i64, // fixed-point: price * 10^9
    pub size: u32,
    pub action: char,
    pub side: char,
    pub flags: u8,
    pub depth: u8,
    pub ts_recv: u64,
    pub ts_in_delta: i32,
    pub sequence: u32,
}

impl TradeMsg {
    pub fn new(instrument_id: u32, ts_event: u64, price: i64, size: u32) -> Self {
        TradeMsg {
            hd: RecordHeader::new(RType::Mbp0, 1, instrument_id, ts_event),
            price,
            size,
            action: 'T',
            side: 'N',
            flags: 0,
            depth: 0,
            ts_recv: ts_event,
            ts_in_delta: 0,
            sequence: 0,
        }
    }

    pub fn price_f64(&self) -> f64 {
        price_from_fixed(self.price)
    }
}

impl RecordMessage for TradeMsg {
    const RTYPE: RType = RType::Mbp0;
    const SIZE: usize = 48;

    fn header(&self) -> &RecordHeader {
        &self.hd
    }

    fn read_body(hd: RecordHeader, body: &[u8]) -> Self {
        TradeMsg {
            hd,
            price: LittleEndian::read_i64(&body[0..8]),
            size: LittleEndian::read_u32(&body[8..12]),
            action: body[12] as char,
            side: body[13] as char,
            flags: body[14],
            depth: body[15],
            ts_recv: LittleEndian::read_u64(&body[16..24]),
            ts_in_delta: LittleEndian::read_i32(&body[24..28]),
            sequence: LittleEndian::read_u32(&body[28..32]),
        }
    }

    fn write_body(&self, body: &mut [u8]) {
        LittleEndian::write_i64(&mut body[0..8], self.price);
        LittleEndian::write_u32(&mut body[8..12], self.size);
        body[12] = ascii_byte(self.action);
        body[13] = ascii_byte(self.side);
        body[14] = self.flags;
        body[15] = self.depth;
        LittleEndian::write_u64(&mut body[16..24], self.ts_recv);
        LittleEndian::write_i32(&mut body[24..28], self.ts_in_delta);
        LittleEndian::write_u32(&mut body[28..32], self.sequence);
    }
}

/// Trading status change for an instrument
/// Total: 16 (header) + 24 = 40 bytes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMsg {
    pub hd: RecordHeader,
    pub ts_recv: u64,
    pub action: u16,
    pub reason: u16,
    pub trading_event: u16,
    pub is_trading: char,
    pub is_quoting: char,
    pub is_short_sell_restricted: char,
}

impl RecordMessage for StatusMsg {
    const RTYPE: RType = RType::Status;
    const SIZE: usize = 40;

    fn header(&self) -> &RecordHeader {
        &self.hd
    }

    fn read_body(hd: RecordHeader, body: &[u8]) -> Self {
        StatusMsg {
            hd,
            ts_recv: LittleEndian::read_u64(&body[0..8]),
            action: LittleEndian::read_u16(&body[8..10]),
            reason: LittleEndian::read_u16(&body[10..12]),
            trading_event: LittleEndian::read_u16(&body[12..14]),
            is_trading: body[14] as char,
            is_quoting: body[15] as char,
            is_short_sell_restricted: body[16] as char,
        }
    }

    fn write_body(&self, body: &mut [u8]) {
        LittleEndian::write_u64(&mut body[0..8], self.ts_recv);
        LittleEndian::write_u16(&mut body[8..10], self.action);
        LittleEndian::write_u16(&mut body[10..12], self.reason);
        LittleEndian::write_u16(&mut body[12..14], self.trading_event);
        body[14] = ascii_byte(self.is_trading);
        body[15] = ascii_byte(self.is_quoting);
        body[16] = ascii_byte(self.is_short_sell_restricted);
    }
}

/// Gateway error notice
/// Total: 16 (header) + 304 = 320 bytes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMsg {
    pub hd: RecordHeader,
    pub err: String,
    pub code: u8,
    pub is_last: u8,
}

impl ErrorMsg {
    pub fn new(ts_event: u64, err: &str) -> Self {
        ErrorMsg {
            hd: RecordHeader::new(RType::Error, 0, 0, ts_event),
            err: err.to_string(),
            code: UNDEF_CODE,
            is_last: 1,
        }
    }
}

impl RecordMessage for ErrorMsg {
    const RTYPE: RType = RType::Error;
    const SIZE: usize = 320;

    fn header(&self) -> &RecordHeader {
        &self.hd
    }

    fn read_body(hd: RecordHeader, body: &[u8]) -> Self {
        ErrorMsg {
            hd,
            err: read_cstr(&body[..ERROR_MSG_LEN]),
            code: body[ERROR_MSG_LEN],
            is_last: body[ERROR_MSG_LEN + 1],
        }
    }

    fn write_body(&self, body: &mut [u8]) {
        write_cstr(&mut body[..ERROR_MSG_LEN], &self.err);
        body[ERROR_MSG_LEN] = self.code;
        body[ERROR_MSG_LEN + 1] = self.is_last;
    }
}

/// Point-in-time mapping of an instrument id to its symbols
/// Total: 16 (header) + 160 = 176 bytes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolMappingMsg {
    pub hd: RecordHeader,
    pub stype_in: u8,
    pub stype_in_symbol: String,
    pub stype_out: u8,
    pub stype_out_symbol: String,
    pub start_ts: u64,
    pub end_ts: u64,
}

impl SymbolMappingMsg {
    pub fn new(instrument_id: u32, ts_event: u64, stype_in_symbol: &str, stype_out_symbol: &str) -> Self {
        SymbolMappingMsg {
            hd: RecordHeader::new(RType::SymbolMapping, 0, instrument_id, ts_event),
            stype_in: UNDEF_CODE,
            stype_in_symbol: stype_in_symbol.to_string(),
            stype_out: UNDEF_CODE,
            stype_out_symbol: stype_out_symbol.to_string(),
            start_ts: ts_event,
            end_ts: u64::MAX,
        }
    }
}

impl RecordMessage for SymbolMappingMsg {
    const RTYPE: RType = RType::SymbolMapping;
    const SIZE: usize = 176;

    fn header(&self) -> &RecordHeader {
        &self.hd
    }

    fn read_body(hd: RecordHeader, body: &[u8]) -> Self {
        let out = 1 + SYMBOL_CSTR_LEN;
        let ts = out + 1 + SYMBOL_CSTR_LEN;
        SymbolMappingMsg {
            hd,
            stype_in: body[0],
            stype_in_symbol: read_cstr(&body[1..out]),
            stype_out: body[out],
            stype_out_symbol: read_cstr(&body[out + 1..ts]),
            start_ts: LittleEndian::read_u64(&body[ts..ts + 8]),
            end_ts: LittleEndian::read_u64(&body[ts + 8..ts + 16]),
        }
    }

    fn write_body(&self, body: &mut [u8]) {
        let out = 1 + SYMBOL_CSTR_LEN;
        let ts = out + 1 + SYMBOL_CSTR_LEN;
        body[0] = self.stype_in;
        write_cstr(&mut body[1..out], &self.stype_in_symbol);
        body[out] = self.stype_out;
        write_cstr(&mut body[out + 1..ts], &self.stype_out_symbol);
        LittleEndian::write_u64(&mut body[ts..ts + 8], self.start_ts);
        LittleEndian::write_u64(&mut body[ts + 8..ts + 16], self.end_ts);
    }
}

/// Gateway system notice, including heartbeats
/// Total: 16 (header) + 304 = 320 bytes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMsg {
    pub hd: RecordHeader,
    pub msg: String,
    pub code: u8,
}

impl SystemMsg {
    pub const HEARTBEAT_CODE: u8 = 0;

    pub fn new(ts_event: u64, msg: &str, code: u8) -> Self {
        SystemMsg {
            hd: RecordHeader::new(RType::System, 0, 0, ts_event),
            msg: msg.to_string(),
            code,
        }
    }

    pub fn heartbeat(ts_event: u64) -> Self {
        SystemMsg::new(ts_event, "Heartbeat", Self::HEARTBEAT_CODE)
    }

    /// Older gateways leave the code unset and only mark heartbeats in the text.
    pub fn is_heartbeat(&self) -> bool {
        if self.code != UNDEF_CODE {
            self.code == Self::HEARTBEAT_CODE
        } else {
            self.msg.starts_with("Heartbeat")
        }
    }
}

impl RecordMessage for SystemMsg {
    const RTYPE: RType = RType::System;
    const SIZE: usize = 320;

    fn header(&self) -> &RecordHeader {
        &self.hd
    }

    fn read_body(hd: RecordHeader, body: &[u8]) -> Self {
        SystemMsg {
            hd,
            msg: read_cstr(&body[..SYSTEM_MSG_LEN]),
            code: body[SYSTEM_MSG_LEN],
        }
    }

    fn write_body(&self, body: &mut [u8]) {
        write_cstr(&mut body[..SYSTEM_MSG_LEN], &self.msg);
        body[SYSTEM_MSG_LEN] = self.code;
    }
}

// Compile-time assertions for memory layout
const _: () = {
    assert!(mem::size_of::<RecordHeader>() == HEADER_SIZE);
    assert!(TradeMsg::SIZE % WORD_SIZE == 0);
    assert!(StatusMsg::SIZE % WORD_SIZE == 0);
    assert!(ErrorMsg::SIZE % WORD_SIZE == 0);
    assert!(SymbolMappingMsg::SIZE % WORD_SIZE == 0);
    assert!(SystemMsg::SIZE % WORD_SIZE == 0);
};

/// Read a NUL-padded text field
pub fn read_cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Write `value` into a NUL-padded text field, truncating so the last byte stays NUL
pub fn write_cstr(field: &mut [u8], value: &str) {
    field.fill(0);
    let len = value.len().min(field.len().saturating_sub(1));
    field[..len].copy_from_slice(&value.as_bytes()[..len]);
}

fn ascii_byte(c: char) -> u8 {
    if c.is_ascii() {
        c as u8
    } else {
        0
    }
}

/// Convert price from fixed-point to float
pub fn price_from_fixed(fixed: i64) -> f64 {
    fixed as f64 / FIXED_PRICE_SCALE
}

/// Convert price to fixed-point
pub fn price_to_fixed(price: f64) -> i64 {
    (price * FIXED_PRICE_SCALE).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtype_conversion() {
        assert_eq!(RType::from_u8(0x16), Some(RType::SymbolMapping));
        assert_eq!(RType::from_u8(0x00), Some(RType::Mbp0));
        assert_eq!(RType::from_u8(0x99), None);
    }

    #[test]
    fn test_price_conversions() {
        let price = 4512.25;
        let fixed = price_to_fixed(price);
        assert_eq!(fixed, 4_512_250_000_000);
        assert!((price_from_fixed(fixed) - price).abs() < 1e-9);
    }

    #[test]
    fn test_header_length_in_words() {
        let bytes = TradeMsg::new(100, 1, 0, 1).encode();
        assert_eq!(bytes.len(), 48);
        assert_eq!(bytes[0], 12);
        assert_eq!(RecordHeader::read(&bytes).record_size(), 48);
    }

    #[test]
    fn test_cstr_truncates_and_terminates() {
        let mut field = [0xFFu8; 5];
        write_cstr(&mut field, "ESZ4-LONG");
        assert_eq!(&field, b"ESZ4\0");
        assert_eq!(read_cstr(&field), "ESZ4");
    }

    #[test]
    fn test_heartbeat_detection() {
        assert!(SystemMsg::heartbeat(0).is_heartbeat());
        assert!(!SystemMsg::new(0, "Subscription request accepted", 1).is_heartbeat());
        assert!(SystemMsg::new(0, "Heartbeat", UNDEF_CODE).is_heartbeat());
        assert!(!SystemMsg::new(0, "Finished replay", UNDEF_CODE).is_heartbeat());
    }
}
