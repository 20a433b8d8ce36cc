//! In-process replay engine
//!
//! Delivers records pushed through a `ReplayFeed` on a dedicated delivery
//! thread, with the same callback contract as a network engine: metadata
//! first, then records in push order, engine faults routed through the
//! exception policy. Used as the default connector and in tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::{Connector, EngineCallbacks, LiveEngine, Metadata, Subscription};
use crate::config::LiveConfig;
use crate::decoder::{DecodeResult, RecordDecoder};
use crate::enums::{Dataset, ExceptionAction, KeepGoing, SType, UpgradePolicy};
use crate::error::{EngineError, EngineResult};
use crate::record::RecordMessage;

/// How often an idle delivery loop checks for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long `start` waits for a finishing loop before reporting it as active
const REAP_TIMEOUT: Duration = Duration::from_millis(500);
/// Record version the replay gateway produces natively
const NATIVE_VERSION: u8 = 2;

enum FeedEvent {
    Record(Vec<u8>),
    Fault(EngineError),
    Close,
}

/// Producer side of a replay engine. Cheap to clone.
#[derive(Clone)]
pub struct ReplayFeed {
    tx: Sender<FeedEvent>,
}

impl ReplayFeed {
    /// Queue one encoded record. Returns false once the engine is gone.
    pub fn push_bytes(&self, bytes: Vec<u8>) -> bool {
        self.tx.send(FeedEvent::Record(bytes)).is_ok()
    }

    pub fn push<T: RecordMessage>(&self, record: &T) -> bool {
        self.push_bytes(record.encode())
    }

    /// Split a buffer of concatenated records and queue each one
    pub fn push_stream(&self, buffer: &[u8]) -> DecodeResult<usize> {
        RecordDecoder::decode_stream(buffer, |record| self.push_bytes(record.as_bytes().to_vec()))
    }

    /// Inject an engine-level fault into the delivery loop
    pub fn fail(&self, message: &str) -> bool {
        self.tx
            .send(FeedEvent::Fault(EngineError::Gateway(message.to_string())))
            .is_ok()
    }

    /// End the current delivery loop as if the gateway closed the session
    pub fn close(&self) -> bool {
        self.tx.send(FeedEvent::Close).is_ok()
    }
}

/// One-shot completion flag
#[derive(Default)]
struct Signal {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Signal {
    fn set(&self) {
        *self.done.lock() = true;
        self.cv.notify_all();
    }

    fn reset(&self) {
        *self.done.lock() = false;
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut done = self.done.lock();
        match timeout {
            None => {
                while !*done {
                    self.cv.wait(&mut done);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*done {
                    if self.cv.wait_until(&mut done, deadline).timed_out() {
                        break;
                    }
                }
                *done
            }
        }
    }
}

pub struct ReplayEngine {
    config: LiveConfig,
    subscriptions: Vec<Subscription>,
    tx: Sender<FeedEvent>,
    rx: Receiver<FeedEvent>,
    shutdown: Arc<AtomicBool>,
    finished: Arc<Signal>,
    connection: Arc<AtomicU32>,
    worker: Option<JoinHandle<()>>,
}

impl ReplayEngine {
    pub fn new(config: LiveConfig) -> Self {
        let (tx, rx) = channel::unbounded();
        ReplayEngine {
            config,
            subscriptions: Vec::new(),
            tx,
            rx,
            shutdown: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(Signal::default()),
            connection: Arc::new(AtomicU32::new(1)),
            worker: None,
        }
    }

    pub fn feed(&self) -> ReplayFeed {
        ReplayFeed { tx: self.tx.clone() }
    }

    /// Connection generation, incremented on every reconnect or restart
    pub fn connection(&self) -> u32 {
        self.connection.load(Ordering::Acquire)
    }

    fn metadata(&self) -> Metadata {
        let version = match self.config.upgrade_policy {
            UpgradePolicy::AsIs | UpgradePolicy::UpgradeToV2 => NATIVE_VERSION,
            UpgradePolicy::UpgradeToV3 => 3,
        };
        let first = self.subscriptions.first();
        Metadata {
            version,
            dataset: self.config.dataset.clone(),
            schema: first.map(|s| s.schema),
            start: unix_nanos_now(),
            stype_in: first.map(|s| s.stype_in),
            stype_out: SType::InstrumentId,
            ts_out: self.config.send_ts_out,
            symbols: self
                .subscriptions
                .iter()
                .flat_map(|s| s.symbols.iter().cloned())
                .collect(),
        }
    }

    /// Join a finished worker. Returns false if a loop is still running.
    fn reap(&mut self, timeout: Option<Duration>) -> bool {
        let Some(handle) = self.worker.take() else {
            return true;
        };
        if !self.finished.wait(timeout) {
            self.worker = Some(handle);
            return false;
        }
        if handle.join().is_err() {
            warn!("replay delivery thread panicked");
        }
        true
    }

    fn loop_active(&self) -> bool {
        self.worker.is_some() && !self.finished.wait(Some(Duration::ZERO))
    }
}

impl LiveEngine for ReplayEngine {
    fn subscribe(&mut self, subscription: &Subscription) -> EngineResult<()> {
        debug!(
            symbols = subscription.symbols.len(),
            schema = ?subscription.schema,
            stype_in = ?subscription.stype_in,
            snapshot = subscription.use_snapshot,
            "replay subscription registered"
        );
        self.subscriptions.push(subscription.clone());
        Ok(())
    }

    fn start(&mut self, callbacks: EngineCallbacks) -> EngineResult<()> {
        if !self.reap(Some(REAP_TIMEOUT)) {
            return Err(EngineError::AlreadyStarted);
        }

        self.finished.reset();
        self.shutdown.store(false, Ordering::Release);

        let delivery = DeliveryLoop {
            rx: self.rx.clone(),
            shutdown: Arc::clone(&self.shutdown),
            connection: Arc::clone(&self.connection),
            metadata: self.metadata(),
            callbacks,
        };
        let finished = Arc::clone(&self.finished);
        let handle = thread::Builder::new()
            .name("fb-delivery".into())
            .spawn(move || {
                delivery.run();
                finished.set();
            })
            .map_err(|e| EngineError::Connect(format!("failed to spawn delivery thread: {e}")))?;

        self.worker = Some(handle);
        Ok(())
    }

    fn reconnect(&mut self) -> EngineResult<()> {
        if self.loop_active() {
            return Err(EngineError::AlreadyStarted);
        }
        let connection = self.connection.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(connection, gateway = %self.config.gateway(), "replay engine reconnected");
        Ok(())
    }

    fn resubscribe(&mut self) -> EngineResult<()> {
        if self.subscriptions.is_empty() {
            return Err(EngineError::Gateway("no subscriptions to resend".into()));
        }
        debug!(count = self.subscriptions.len(), "replay subscriptions resent");
        Ok(())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn block_for_stop(&mut self, timeout: Option<Duration>) -> KeepGoing {
        if self.reap(timeout) {
            KeepGoing::Stop
        } else {
            KeepGoing::Continue
        }
    }
}

impl Drop for ReplayEngine {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            // Released from inside a callback: the loop exits on its own.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("replay delivery thread panicked");
            }
        }
    }
}

struct DeliveryLoop {
    rx: Receiver<FeedEvent>,
    shutdown: Arc<AtomicBool>,
    connection: Arc<AtomicU32>,
    metadata: Metadata,
    callbacks: EngineCallbacks,
}

impl DeliveryLoop {
    /// Runs until a sink says stop, the feed closes, shutdown is requested,
    /// or the exception policy declines to restart. Consumes the callbacks.
    fn run(mut self) {
        self.send_metadata();

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                debug!("replay delivery loop shut down");
                break;
            }

            let event = match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let fault = match event {
                FeedEvent::Record(bytes) => match RecordDecoder::decode(&bytes) {
                    Ok((record, _)) => {
                        if (self.callbacks.on_record)(&record) == KeepGoing::Stop {
                            break;
                        }
                        continue;
                    }
                    Err(e) => EngineError::Decode(e),
                },
                FeedEvent::Fault(err) => err,
                FeedEvent::Close => break,
            };

            if !self.recover(&fault) {
                break;
            }
        }
    }

    /// Ask the exception policy what to do. Restarting reconnects in place and
    /// resends metadata; the loop itself keeps iterating.
    fn recover(&mut self, fault: &EngineError) -> bool {
        let action = match self.callbacks.on_exception.as_mut() {
            Some(policy) => policy(fault),
            None => ExceptionAction::Stop,
        };
        match action {
            ExceptionAction::Restart => {
                let connection = self.connection.fetch_add(1, Ordering::AcqRel) + 1;
                info!(connection, %fault, "replay engine restarting after fault");
                self.metadata.start = unix_nanos_now();
                self.send_metadata();
                true
            }
            ExceptionAction::Stop => false,
        }
    }

    fn send_metadata(&mut self) {
        if let Some(on_metadata) = self.callbacks.on_metadata.as_mut() {
            on_metadata(&self.metadata);
        }
    }
}

fn unix_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Connector producing replay engines.
///
/// Rejects unknown dataset codes, gateways under the reserved `.invalid`
/// domain, and, when an allow-list is configured, unknown API keys. The feed
/// of the most recent session opened with a key is kept for `feed`.
#[derive(Default)]
pub struct ReplayConnector {
    feeds: Mutex<HashMap<String, ReplayFeed>>,
    authorized_keys: Option<HashSet<String>>,
}

impl ReplayConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_authorized_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ReplayConnector {
            feeds: Mutex::new(HashMap::new()),
            authorized_keys: Some(keys.into_iter().map(Into::into).collect()),
        }
    }

    /// Process-wide instance used when no connector is installed
    pub fn shared() -> Arc<ReplayConnector> {
        static SHARED: OnceLock<Arc<ReplayConnector>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(ReplayConnector::new())))
    }

    /// Feed of the last session opened with `key`
    pub fn feed(&self, key: &str) -> Option<ReplayFeed> {
        self.feeds.lock().get(key).cloned()
    }
}

impl Connector for ReplayConnector {
    fn connect(&self, config: &LiveConfig) -> EngineResult<Box<dyn LiveEngine>> {
        if Dataset::from_code(&config.dataset).is_none() {
            return Err(EngineError::Connect(format!("unknown dataset '{}'", config.dataset)));
        }
        let gateway = config.gateway();
        if gateway.host.ends_with(".invalid") {
            return Err(EngineError::Connect(format!("gateway {gateway} is unreachable")));
        }
        if let Some(keys) = &self.authorized_keys {
            if !keys.contains(&config.key) {
                return Err(EngineError::Authentication("API key rejected by gateway".into()));
            }
        }

        let engine = ReplayEngine::new(config.clone());
        self.feeds.lock().insert(config.key.clone(), engine.feed());
        info!(dataset = %config.dataset, %gateway, "replay session connected");
        Ok(Box::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::Schema;
    use crate::record::{SystemMsg, TradeMsg};
    use std::sync::atomic::AtomicUsize;

    fn config() -> LiveConfig {
        LiveConfig {
            key: "K".into(),
            dataset: "GLBX.MDP3".into(),
            ..LiveConfig::default()
        }
    }

    fn counting_callbacks(count: Arc<AtomicUsize>, stop_after: usize) -> EngineCallbacks {
        EngineCallbacks {
            on_record: Box::new(move |_| {
                let seen = count.fetch_add(1, Ordering::SeqCst) + 1;
                if seen >= stop_after {
                    KeepGoing::Stop
                } else {
                    KeepGoing::Continue
                }
            }),
            on_metadata: None,
            on_exception: None,
        }
    }

    #[test]
    fn test_records_delivered_in_order_until_stop() {
        let mut engine = ReplayEngine::new(config());
        let feed = engine.feed();
        for i in 0..5 {
            feed.push(&TradeMsg::new(i, 0, 0, 1));
        }

        let count = Arc::new(AtomicUsize::new(0));
        engine.start(counting_callbacks(Arc::clone(&count), 3)).unwrap();
        assert_eq!(engine.block_for_stop(Some(Duration::from_secs(5))), KeepGoing::Stop);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_block_for_stop_times_out_while_idle_loop_runs() {
        let mut engine = ReplayEngine::new(config());
        let count = Arc::new(AtomicUsize::new(0));
        engine.start(counting_callbacks(count, 1)).unwrap();

        assert_eq!(engine.block_for_stop(Some(Duration::from_millis(30))), KeepGoing::Continue);
        assert!(matches!(engine.start(counting_callbacks(Arc::new(AtomicUsize::new(0)), 1)), Err(EngineError::AlreadyStarted)));

        engine.feed().close();
        assert_eq!(engine.block_for_stop(None), KeepGoing::Stop);
    }

    #[test]
    fn test_stop_ends_idle_loop() {
        let mut engine = ReplayEngine::new(config());
        engine.start(counting_callbacks(Arc::new(AtomicUsize::new(0)), 1)).unwrap();
        engine.stop();
        assert_eq!(engine.block_for_stop(Some(Duration::from_secs(5))), KeepGoing::Stop);
    }

    #[test]
    fn test_fault_without_policy_stops_loop() {
        let mut engine = ReplayEngine::new(config());
        let feed = engine.feed();
        feed.fail("gateway went away");
        feed.push(&SystemMsg::heartbeat(0));

        let count = Arc::new(AtomicUsize::new(0));
        engine.start(counting_callbacks(Arc::clone(&count), usize::MAX)).unwrap();
        assert_eq!(engine.block_for_stop(Some(Duration::from_secs(5))), KeepGoing::Stop);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restart_resends_metadata_and_bumps_connection() {
        let mut engine = ReplayEngine::new(config());
        engine
            .subscribe(&Subscription::new(&["ES.FUT"], Schema::Trades, SType::Parent).unwrap())
            .unwrap();
        let feed = engine.feed();
        feed.push_bytes(vec![0u8; 8]); // truncated header: decode fault
        feed.push(&TradeMsg::new(1, 0, 0, 1));

        let metadata_seen = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&metadata_seen);
        let count = Arc::new(AtomicUsize::new(0));
        let records = Arc::clone(&count);
        engine
            .start(EngineCallbacks {
                on_record: Box::new(move |_| {
                    records.fetch_add(1, Ordering::SeqCst);
                    KeepGoing::Stop
                }),
                on_metadata: Some(Box::new(move |metadata| {
                    assert_eq!(metadata.symbols, vec!["ES.FUT".to_string()]);
                    seen.fetch_add(1, Ordering::SeqCst);
                })),
                on_exception: Some(Box::new(|_| ExceptionAction::Restart)),
            })
            .unwrap();

        assert_eq!(engine.block_for_stop(Some(Duration::from_secs(5))), KeepGoing::Stop);
        assert_eq!(metadata_seen.load(Ordering::SeqCst), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(engine.connection(), 2);
    }

    #[test]
    fn test_connector_validation() {
        let connector = ReplayConnector::with_authorized_keys(["K"]);

        let mut bad_dataset = config();
        bad_dataset.dataset = "NOT A DATASET".into();
        assert!(matches!(connector.connect(&bad_dataset), Err(EngineError::Connect(_))));

        let mut unreachable = config();
        unreachable.gateway = Some(crate::config::Gateway {
            host: "gateway.invalid".into(),
            port: 13000,
        });
        assert!(matches!(connector.connect(&unreachable), Err(EngineError::Connect(_))));

        let mut bad_key = config();
        bad_key.key = "other".into();
        assert!(matches!(connector.connect(&bad_key), Err(EngineError::Authentication(_))));

        assert!(connector.connect(&config()).is_ok());
        assert!(connector.feed("K").is_some());
    }

    #[test]
    fn test_resubscribe_requires_subscriptions() {
        let mut engine = ReplayEngine::new(config());
        assert!(engine.resubscribe().is_err());
        engine
            .subscribe(&Subscription::new(&["ESZ4"], Schema::Trades, SType::RawSymbol).unwrap())
            .unwrap();
        assert!(engine.resubscribe().is_ok());
        assert!(engine.reconnect().is_ok());
        assert_eq!(engine.connection(), 2);
    }
}
