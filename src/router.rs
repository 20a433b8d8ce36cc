//! Record dispatch router
//!
//! Classifies each delivered record by rtype and turns it into an `Event` for
//! event sinks, keeping the symbol map current along the way.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::decoder::Record;
use crate::error::DispatchError;
use crate::record::*;
use crate::stats::SessionStats;
use crate::symbol_map::SymbolMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Mapping,
    Trade,
    System,
    Error,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Mapping => "mapping",
            EventKind::Trade => "trade",
            EventKind::System => "system",
            EventKind::Error => "error",
            EventKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routed record as seen by event sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    /// Set for trades; zero otherwise
    pub instrument_id: u32,
    /// Resolved symbol for trades; empty when unresolved or not applicable
    pub symbol: String,
    pub text: String,
}

impl Event {
    fn new(kind: EventKind, text: String) -> Self {
        Event {
            kind,
            instrument_id: 0,
            symbol: String::new(),
            text,
        }
    }
}

pub struct Router {
    symbols: SymbolMap,
    stats: Arc<SessionStats>,
}

impl Router {
    pub fn new(symbols: SymbolMap, stats: Arc<SessionStats>) -> Self {
        Router { symbols, stats }
    }

    pub fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    /// Route one record. `Ok(None)` means the record is suppressed.
    pub fn route(&self, record: &Record<'_>) -> Result<Option<Event>, DispatchError> {
        let event = match RType::from_u8(record.rtype()) {
            Some(RType::SymbolMapping) => {
                let mapping: SymbolMappingMsg = record.get()?;
                self.symbols.on_symbol_mapping(&mapping);
                Event::new(EventKind::Mapping, serde_json::to_string(&mapping)?)
            }
            Some(RType::Mbp0) => {
                let trade: TradeMsg = record.get()?;
                let instrument_id = trade.hd.instrument_id;
                Event {
                    kind: EventKind::Trade,
                    instrument_id,
                    symbol: self.symbols.resolve(instrument_id),
                    text: serde_json::to_string(&trade)?,
                }
            }
            Some(RType::System) => {
                let system: SystemMsg = record.get()?;
                if system.is_heartbeat() {
                    trace!(ts_event = system.hd.ts_event, "heartbeat suppressed");
                    self.stats.record_heartbeat();
                    return Ok(None);
                }
                Event::new(EventKind::System, serde_json::to_string(&system)?)
            }
            Some(RType::Status) => {
                let status: StatusMsg = record.get()?;
                Event::new(EventKind::System, serde_json::to_string(&status)?)
            }
            Some(RType::Error) => {
                let error: ErrorMsg = record.get()?;
                Event::new(EventKind::Error, serde_json::to_string(&error)?)
            }
            _ => Event::new(
                EventKind::Unknown,
                format!("Unhandled record rtype=0x{:02x}", record.rtype()),
            ),
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::RecordDecoder;

    fn router() -> Router {
        Router::new(SymbolMap::new(), Arc::new(SessionStats::new()))
    }

    fn route_bytes(router: &Router, bytes: &[u8]) -> Result<Option<Event>, DispatchError> {
        let (record, _) = RecordDecoder::decode(bytes).unwrap();
        router.route(&record)
    }

    #[test]
    fn test_mapping_then_trade_resolves_symbol() {
        let router = router();
        let mapping = route_bytes(&router, &SymbolMappingMsg::new(100, 1, "ES.FUT", "ESZ4").encode())
            .unwrap()
            .unwrap();
        assert_eq!(mapping.kind, EventKind::Mapping);
        assert_eq!(mapping.instrument_id, 0);
        assert!(mapping.text.contains("ESZ4"));

        let trade = route_bytes(&router, &TradeMsg::new(100, 2, 4_512_250_000_000, 1).encode())
            .unwrap()
            .unwrap();
        assert_eq!(trade.kind, EventKind::Trade);
        assert_eq!(trade.instrument_id, 100);
        assert_eq!(trade.symbol, "ESZ4");
    }

    #[test]
    fn test_unmapped_trade_has_empty_symbol() {
        let router = router();
        let trade = route_bytes(&router, &TradeMsg::new(7, 0, 0, 1).encode()).unwrap().unwrap();
        assert_eq!(trade.symbol, "");
    }

    #[test]
    fn test_heartbeat_suppressed_other_system_forwarded() {
        let router = router();
        assert!(route_bytes(&router, &SystemMsg::heartbeat(0).encode()).unwrap().is_none());
        assert_eq!(router.stats.snapshot().heartbeats, 1);

        let notice = route_bytes(&router, &SystemMsg::new(0, "Subscription request accepted", 1).encode())
            .unwrap()
            .unwrap();
        assert_eq!(notice.kind, EventKind::System);
    }

    #[test]
    fn test_error_record() {
        let router = router();
        let event = route_bytes(&router, &ErrorMsg::new(0, "auth failed").encode()).unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Error);
        assert!(event.text.contains("auth failed"));
    }

    #[test]
    fn test_unknown_rtype_in_hex() {
        let router = router();
        let mut bytes = vec![0u8; 16];
        RecordHeader::new(RType::Mbo, 1, 9, 0).write(&mut bytes);
        let event = route_bytes(&router, &bytes).unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Unknown);
        assert_eq!(event.text, "Unhandled record rtype=0xa0");
    }

    #[test]
    fn test_short_body_is_dispatch_error() {
        let router = router();
        let mut bytes = vec![0u8; 16];
        RecordHeader::new(RType::SymbolMapping, 0, 1, 0).write(&mut bytes);
        assert!(matches!(route_bytes(&router, &bytes), Err(DispatchError::Decode(_))));
        assert!(router.symbols().is_empty());
    }
}
