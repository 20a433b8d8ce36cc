//! Point-in-time instrument id to symbol mapping
//!
//! Updated only from symbol mapping records on the delivery thread. Reads are
//! safe from any thread; the map is shared behind a read-write lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::record::SymbolMappingMsg;

#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    inner: Arc<RwLock<HashMap<u32, String>>>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a mapping record; the output symbol replaces any earlier mapping
    pub fn on_symbol_mapping(&self, mapping: &SymbolMappingMsg) {
        self.insert(mapping.hd.instrument_id, &mapping.stype_out_symbol);
    }

    pub fn insert(&self, instrument_id: u32, symbol: &str) {
        self.inner.write().insert(instrument_id, symbol.to_string());
    }

    pub fn get(&self, instrument_id: u32) -> Option<String> {
        self.inner.read().get(&instrument_id).cloned()
    }

    /// Resolved symbol, or an empty string when no mapping has been seen
    pub fn resolve(&self, instrument_id: u32) -> String {
        self.get(instrument_id).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_mapping_wins() {
        let map = SymbolMap::new();
        map.on_symbol_mapping(&SymbolMappingMsg::new(100, 1, "ES.FUT", "ESZ4"));
        map.on_symbol_mapping(&SymbolMappingMsg::new(100, 2, "ES.FUT", "ESH5"));
        assert_eq!(map.resolve(100), "ESH5");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_unresolved_is_empty() {
        let map = SymbolMap::new();
        assert_eq!(map.get(7), None);
        assert_eq!(map.resolve(7), "");
    }

    #[test]
    fn test_clones_share_state() {
        let map = SymbolMap::new();
        let reader = map.clone();
        map.insert(5, "NQZ4");
        assert_eq!(reader.resolve(5), "NQZ4");
        map.clear();
        assert!(reader.is_empty());
    }
}
