//! Record layout conformance and decoder tests

use byteorder::{ByteOrder, LittleEndian};
use feed_bridge::decoder::DecodeError;
use feed_bridge::record::{RecordMessage, HEADER_SIZE, UNDEF_CODE};
use feed_bridge::{
    ErrorMsg, RType, RecordDecoder, RecordHeader, StatusMsg, SymbolMappingMsg, SystemMsg, TradeMsg,
};

fn raw_record(rtype: u8, instrument_id: u32, total_size: usize) -> Vec<u8> {
    let mut msg = vec![0u8; total_size];
    msg[0] = (total_size / 4) as u8;
    msg[1] = rtype;
    LittleEndian::write_u16(&mut msg[2..4], 1);
    LittleEndian::write_u32(&mut msg[4..8], instrument_id);
    LittleEndian::write_u64(&mut msg[8..16], 1_700_000_000_000_000_000);
    msg
}

#[test]
fn test_header_wire_layout() {
    let msg = raw_record(0x00, 4242, 48);
    let (record, consumed) = RecordDecoder::decode(&msg).unwrap();

    assert_eq!(consumed, 48);
    assert_eq!(record.header().length, 12);
    assert_eq!(record.rtype(), RType::Mbp0 as u8);
    assert_eq!(record.header().publisher_id, 1);
    assert_eq!(record.instrument_id(), 4242);
    assert_eq!(record.header().ts_event, 1_700_000_000_000_000_000);
    assert_eq!(record.body().len(), 48 - HEADER_SIZE);
}

#[test]
fn test_trade_fields() {
    let mut msg = raw_record(0x00, 7, 48);
    LittleEndian::write_i64(&mut msg[16..24], 4_512_250_000_000);
    LittleEndian::write_u32(&mut msg[24..28], 3);

    let (record, _) = RecordDecoder::decode(&msg).unwrap();
    let trade: TradeMsg = record.get().unwrap();
    assert_eq!(trade.size, 3);
    assert!((trade.price_f64() - 4512.25).abs() < 1e-9);
}

#[test]
fn test_each_message_type_sizes() {
    assert_eq!(TradeMsg::new(1, 0, 0, 1).encode().len(), 48);
    assert_eq!(StatusMsg::SIZE, 40);
    assert_eq!(ErrorMsg::new(0, "x").encode().len(), 320);
    assert_eq!(SymbolMappingMsg::new(1, 0, "ES.FUT", "ESZ4").encode().len(), 176);
    assert_eq!(SystemMsg::heartbeat(0).encode().len(), 320);
}

#[test]
fn test_symbol_mapping_fields() {
    let bytes = SymbolMappingMsg::new(100, 5, "ES.FUT", "ESZ4").encode();
    let (record, _) = RecordDecoder::decode(&bytes).unwrap();
    let mapping: SymbolMappingMsg = record.get().unwrap();

    assert_eq!(mapping.hd.instrument_id, 100);
    assert_eq!(mapping.stype_in_symbol, "ES.FUT");
    assert_eq!(mapping.stype_out_symbol, "ESZ4");
}

#[test]
fn test_heartbeat_by_text_when_code_undefined() {
    let legacy = SystemMsg::new(0, "Heartbeat", UNDEF_CODE);
    assert!(legacy.is_heartbeat());

    let notice = SystemMsg::new(0, "Subscription request accepted", UNDEF_CODE);
    assert!(!notice.is_heartbeat());

    let bytes = legacy.encode();
    let (record, _) = RecordDecoder::decode(&bytes).unwrap();
    assert!(record.get::<SystemMsg>().unwrap().is_heartbeat());
}

#[test]
fn test_buffer_too_small_header() {
    let small = vec![0u8; 8];
    let result = RecordDecoder::decode(&small);
    assert!(matches!(result, Err(DecodeError::BufferTooSmall { need: 16, have: 8 })));
}

#[test]
fn test_truncated_record() {
    let mut msg = raw_record(0x00, 1, 16);
    msg[0] = 12; // claims 48 bytes
    let result = RecordDecoder::decode(&msg);
    assert!(matches!(
        result,
        Err(DecodeError::TruncatedRecord { declared: 48, actual: 16 })
    ));
}

#[test]
fn test_zero_length() {
    let mut msg = raw_record(0x00, 1, 16);
    msg[0] = 0;
    assert!(matches!(RecordDecoder::decode(&msg), Err(DecodeError::InvalidLength(0))));
}

#[test]
fn test_unknown_rtype_still_decodes() {
    let msg = raw_record(0xEE, 9, 24);
    let (record, consumed) = RecordDecoder::decode(&msg).unwrap();
    assert_eq!(consumed, 24);
    assert_eq!(record.rtype(), 0xEE);
    assert!(RType::from_u8(0xEE).is_none());
}

#[test]
fn test_decode_stream() {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&SymbolMappingMsg::new(1, 0, "ES.FUT", "ESZ4").encode());
    buffer.extend_from_slice(&TradeMsg::new(1, 1, 0, 1).encode());
    buffer.extend_from_slice(&SystemMsg::heartbeat(2).encode());
    buffer.extend_from_slice(&TradeMsg::new(1, 3, 0, 1).encode());

    let mut rtypes = Vec::new();
    let count = RecordDecoder::decode_stream(&buffer, |record| {
        rtypes.push(record.rtype());
        true
    })
    .unwrap();

    assert_eq!(count, 4);
    assert_eq!(rtypes, vec![0x16, 0x00, 0x17, 0x00]);
}

#[test]
fn test_decode_stream_early_stop() {
    let mut buffer = Vec::new();
    for i in 0..10 {
        buffer.extend_from_slice(&TradeMsg::new(i, 0, 0, 1).encode());
    }

    let mut seen = 0;
    let count = RecordDecoder::decode_stream(&buffer, |_| {
        seen += 1;
        seen < 3
    })
    .unwrap();

    assert_eq!(count, 3);
}

#[test]
fn test_decode_stream_trailing_partial_header() {
    let mut buffer = TradeMsg::new(1, 0, 0, 1).encode();
    buffer.extend_from_slice(&[0u8; 5]);
    assert_eq!(RecordDecoder::decode_stream(&buffer, |_| true).unwrap(), 1);
}

#[test]
fn test_header_write_read() {
    let mut buf = vec![0u8; HEADER_SIZE];
    let header = RecordHeader::new(RType::Status, 2, 77, 123);
    header.write(&mut buf);
    let parsed = RecordHeader::read(&buf);
    assert_eq!(parsed.rtype, 0x12);
    assert_eq!(parsed.instrument_id, 77);
    assert_eq!(parsed.record_size(), HEADER_SIZE);
}
