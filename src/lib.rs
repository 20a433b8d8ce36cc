//! Feed Bridge - C ABI adapter for a threaded live market-data session
//!
//! Exposes a live streaming session to foreign callers through opaque handles,
//! integer status codes and a per-thread last-error slot. Features include:
//! - Zero-copy decoding of length-prefixed binary records
//! - Configuration builder with validation
//! - Session lifecycle with exactly-one-winner start and cooperative stop
//! - Record routing with point-in-time symbol resolution
//! - Callback fault isolation on the delivery thread
//! - Session statistics

pub mod config;
pub mod decoder;
pub mod engine;
pub mod enums;
pub mod error;
pub mod ffi;
pub mod lifecycle;
pub mod logging;
pub mod record;
pub mod router;
pub mod session;
pub mod stats;
pub mod symbol_map;

pub use config::{Gateway, LiveBuilder, LiveConfig};
pub use decoder::{DecodeError, Record, RecordDecoder};
pub use engine::{Connector, LiveEngine, Metadata, StartPoint, Subscription};
pub use enums::{Dataset, ExceptionAction, KeepGoing, SType, Schema, UpgradePolicy};
pub use error::{BridgeError, EngineError, Result};
pub use lifecycle::SessionState;
pub use record::{ErrorMsg, RType, RecordHeader, StatusMsg, SymbolMappingMsg, SystemMsg, TradeMsg};
pub use router::{Event, EventKind};
pub use session::{Callbacks, LiveSession};
pub use stats::StatsSnapshot;
pub use symbol_map::SymbolMap;
