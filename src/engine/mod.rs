//! Streaming engine seam
//!
//! The session adapter drives an engine only through `LiveEngine`. Engines are
//! produced by a `Connector`; the process-wide connector defaults to the
//! in-process replay engine and can be replaced with `install_connector`.

pub mod replay;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::LiveConfig;
use crate::decoder::Record;
use crate::enums::{ExceptionAction, KeepGoing, SType, Schema};
use crate::error::{BridgeError, EngineError, EngineResult, Result};

pub type RecordCallback = Box<dyn FnMut(&Record<'_>) -> KeepGoing + Send>;
pub type MetadataCallback = Box<dyn FnMut(&Metadata) + Send>;
pub type ExceptionCallback = Box<dyn FnMut(&EngineError) -> ExceptionAction + Send>;

/// Callbacks handed to the engine's delivery loop
pub struct EngineCallbacks {
    pub on_record: RecordCallback,
    pub on_metadata: Option<MetadataCallback>,
    pub on_exception: Option<ExceptionCallback>,
}

/// Where a subscription starts replaying from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StartPoint {
    UnixNanos(u64),
    /// Passed through to the gateway unparsed, e.g. an ISO 8601 timestamp
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub symbols: Vec<String>,
    pub schema: Schema,
    pub stype_in: SType,
    pub start: Option<StartPoint>,
    pub use_snapshot: bool,
}

impl Subscription {
    /// Validate and build a live subscription.
    /// Symbol lists must be non-empty and contain no blank entries.
    pub fn new<S: AsRef<str>>(symbols: &[S], schema: Schema, stype_in: SType) -> Result<Self> {
        if symbols.is_empty() {
            return Err(BridgeError::InvalidArgument("at least one symbol is required".into()));
        }
        let mut owned = Vec::with_capacity(symbols.len());
        for (i, symbol) in symbols.iter().enumerate() {
            let symbol = symbol.as_ref().trim();
            if symbol.is_empty() {
                return Err(BridgeError::InvalidArgument(format!(
                    "symbol list contains an empty entry at index {i}"
                )));
            }
            owned.push(symbol.to_string());
        }
        Ok(Subscription {
            symbols: owned,
            schema,
            stype_in,
            start: None,
            use_snapshot: false,
        })
    }

    pub fn starting_at(mut self, start: StartPoint) -> Result<Self> {
        if let StartPoint::Text(text) = &start {
            if text.trim().is_empty() {
                return Err(BridgeError::InvalidArgument("start time cannot be empty".into()));
            }
        }
        self.start = Some(start);
        Ok(self)
    }

    pub fn with_snapshot(mut self) -> Self {
        self.use_snapshot = true;
        self
    }
}

/// Session metadata delivered before the first record of each connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub version: u8,
    pub dataset: String,
    pub schema: Option<Schema>,
    pub start: u64,
    pub stype_in: Option<SType>,
    pub stype_out: SType,
    pub ts_out: bool,
    pub symbols: Vec<String>,
}

/// Contract for a streaming engine.
///
/// `start` hands the callbacks to a delivery loop running on a thread owned
/// by the engine. The engine drops the callbacks when that loop exits; the
/// session observes loop termination through that drop.
pub trait LiveEngine: Send {
    fn subscribe(&mut self, subscription: &Subscription) -> EngineResult<()>;

    fn start(&mut self, callbacks: EngineCallbacks) -> EngineResult<()>;

    fn reconnect(&mut self) -> EngineResult<()>;

    fn resubscribe(&mut self) -> EngineResult<()>;

    /// Ask the delivery loop to exit at its next check without waiting
    fn stop(&mut self);

    /// Wait for the delivery loop to exit. `None` waits without bound.
    /// Returns `Stop` once no loop is running, `Continue` on timeout.
    fn block_for_stop(&mut self, timeout: Option<Duration>) -> KeepGoing;
}

/// Opens engine connections. Blocks until the handshake completes or fails.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &LiveConfig) -> EngineResult<Box<dyn LiveEngine>>;
}

static CONNECTOR: RwLock<Option<Arc<dyn Connector>>> = parking_lot::const_rwlock(None);

/// Replace the connector used by `LiveBuilder::build` and the C boundary
pub fn install_connector(connector: Arc<dyn Connector>) {
    *CONNECTOR.write() = Some(connector);
}

pub fn connector() -> Arc<dyn Connector> {
    if let Some(installed) = CONNECTOR.read().as_ref() {
        return Arc::clone(installed);
    }
    replay::ReplayConnector::shared()
}
