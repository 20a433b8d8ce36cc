//! Live session adapter
//!
//! Wraps a `LiveEngine` with the session lifecycle, the record dispatch
//! router and fault isolation. Every user callback runs on the engine's
//! delivery thread; a panic in one is contained there and never reaches the
//! engine or the caller.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::LiveConfig;
use crate::decoder::Record;
use crate::engine::{
    Connector, EngineCallbacks, ExceptionCallback, LiveEngine, Metadata, MetadataCallback,
    RecordCallback, Subscription,
};
use crate::enums::{ExceptionAction, KeepGoing};
use crate::error::{BridgeError, EngineError, Result};
use crate::lifecycle::{DeliveryScope, Lifecycle, LoopGuard, SessionState};
use crate::router::{Event, Router};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::symbol_map::SymbolMap;

pub type EventCallback = Box<dyn FnMut(&Event) + Send>;

/// Sinks for one delivery loop. At least one of the record or event sinks
/// must be set.
#[derive(Default)]
pub struct Callbacks {
    on_record: Option<RecordCallback>,
    on_event: Option<EventCallback>,
    on_metadata: Option<MetadataCallback>,
    on_exception: Option<ExceptionCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw record sink. Returning `Stop` ends the delivery loop.
    pub fn on_record<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Record<'_>) -> KeepGoing + Send + 'static,
    {
        self.on_record = Some(Box::new(f));
        self
    }

    /// Routed event sink. Heartbeats never reach it.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.on_event = Some(Box::new(f));
        self
    }

    pub fn on_metadata<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Metadata) + Send + 'static,
    {
        self.on_metadata = Some(Box::new(f));
        self
    }

    /// Exception policy. Without one, engine faults stop the session.
    pub fn on_exception<F>(mut self, f: F) -> Self
    where
        F: FnMut(&EngineError) -> ExceptionAction + Send + 'static,
    {
        self.on_exception = Some(Box::new(f));
        self
    }
}

pub struct LiveSession {
    config: LiveConfig,
    engine: Mutex<Box<dyn LiveEngine>>,
    subscriptions: Mutex<Vec<Subscription>>,
    lifecycle: Arc<Lifecycle>,
    symbols: SymbolMap,
    stats: Arc<SessionStats>,
}

impl LiveSession {
    /// Open a session. Blocks until the engine connection is established.
    pub fn connect(config: LiveConfig, connector: &dyn Connector) -> Result<Self> {
        config.validate()?;
        let gateway = config.gateway();
        debug!(?config, "connecting live session");

        let engine = connector.connect(&config).map_err(|e| {
            error!(dataset = %config.dataset, %gateway, error = %e, "live session connect failed");
            BridgeError::from(e)
        })?;
        info!(dataset = %config.dataset, %gateway, "live session connected");

        Ok(LiveSession {
            config,
            engine: Mutex::new(engine),
            subscriptions: Mutex::new(Vec::new()),
            lifecycle: Arc::new(Lifecycle::new()),
            symbols: SymbolMap::new(),
            stats: Arc::new(SessionStats::new()),
        })
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().clone()
    }

    pub fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    pub fn resolve_symbol(&self, instrument_id: u32) -> Option<String> {
        self.symbols.get(instrument_id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Register a subscription. On failure the registered set is unchanged.
    pub fn subscribe(&self, subscription: Subscription) -> Result<()> {
        self.lifecycle.ensure_usable()?;
        let mut engine = self.engine.lock();
        engine.subscribe(&subscription)?;
        info!(
            symbols = ?subscription.symbols,
            schema = ?subscription.schema,
            stype_in = ?subscription.stype_in,
            "subscribed"
        );
        self.subscriptions.lock().push(subscription);
        Ok(())
    }

    /// Begin delivery on the engine's thread. Fails if a loop is already
    /// active; exactly one of several concurrent calls succeeds.
    pub fn start(&self, callbacks: Callbacks) -> Result<()> {
        if callbacks.on_record.is_none() && callbacks.on_event.is_none() {
            return Err(BridgeError::InvalidArgument(
                "a record or event callback is required".into(),
            ));
        }

        let attempt = self.lifecycle.begin_start()?;
        self.symbols.clear();
        self.stats.on_start();
        let engine_callbacks = self.wire(callbacks, attempt.loop_guard());

        let mut engine = self.engine.lock();
        if let Err(e) = engine.start(engine_callbacks) {
            error!(error = %e, "delivery loop failed to start");
            attempt.failed();
            return Err(e.into());
        }
        attempt.succeeded();
        if self.lifecycle.stop_requested() {
            engine.stop();
        }
        info!(dataset = %self.config.dataset, "delivery loop started");
        Ok(())
    }

    fn wire(&self, callbacks: Callbacks, guard: LoopGuard) -> EngineCallbacks {
        let Callbacks {
            on_record,
            on_event,
            on_metadata,
            on_exception,
        } = callbacks;

        let mut pipeline = RecordPipeline {
            router: Router::new(self.symbols.clone(), Arc::clone(&self.stats)),
            lifecycle: Arc::clone(&self.lifecycle),
            stats: Arc::clone(&self.stats),
            on_record,
            on_event,
            _guard: guard,
        };
        let mut policy = ExceptionPolicy {
            lifecycle: Arc::clone(&self.lifecycle),
            stats: Arc::clone(&self.stats),
            on_exception,
        };
        let on_metadata = on_metadata.map(|mut sink| -> MetadataCallback {
            let stats = Arc::clone(&self.stats);
            let lifecycle = Arc::clone(&self.lifecycle);
            Box::new(move |metadata: &Metadata| {
                let _scope = DeliveryScope::enter(&lifecycle);
                if panic::catch_unwind(AssertUnwindSafe(|| sink(metadata))).is_err() {
                    stats.record_callback_fault();
                    warn!("metadata callback panicked");
                }
            })
        });

        EngineCallbacks {
            on_record: Box::new(move |record: &Record<'_>| pipeline.on_record(record)),
            on_metadata,
            on_exception: Some(Box::new(move |fault: &EngineError| policy.decide(fault))),
        }
    }

    /// Request a stop and wait up to `timeout` (`None` waits without bound)
    /// for the loop to exit. Idle sessions return `Stop` immediately.
    pub fn stop(&self, timeout: Option<Duration>) -> KeepGoing {
        if !self.lifecycle.is_running() {
            return KeepGoing::Stop;
        }
        info!("stop requested");
        self.lifecycle.request_stop();
        if self.lifecycle.stop_requested() {
            // Rechecked under the engine lock: a loop started after ours
            // exited must not receive this stop.
            let mut engine = self.engine.lock();
            if self.lifecycle.stop_requested() {
                engine.stop();
            }
        }
        self.lifecycle.wait_for_stop(timeout)
    }

    /// Wait for the loop to exit without requesting it.
    /// Returns `Continue` if it is still running when the wait ends.
    pub fn block_for_stop(&self, timeout: Option<Duration>) -> KeepGoing {
        self.lifecycle.wait_for_stop(timeout)
    }

    /// Reopen the engine connection with the stored configuration
    pub fn reconnect(&self) -> Result<()> {
        self.lifecycle.ensure_idle("reconnect")?;
        let mut engine = self.engine.lock();
        if self.subscriptions.lock().is_empty() {
            return Err(BridgeError::NoSubscriptions("reconnect"));
        }
        engine.reconnect()?;
        info!(gateway = %self.config.gateway(), "reconnected");
        Ok(())
    }

    /// Resend every registered subscription
    pub fn resubscribe(&self) -> Result<()> {
        self.lifecycle.ensure_idle("resubscribe")?;
        let mut engine = self.engine.lock();
        let count = self.subscriptions.lock().len();
        if count == 0 {
            return Err(BridgeError::NoSubscriptions("resubscribe"));
        }
        engine.resubscribe()?;
        info!(count, "resubscribed");
        Ok(())
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.lifecycle.request_stop();
        let engine = self.engine.get_mut();
        engine.stop();
        if !self.lifecycle.on_delivery_thread() {
            let timeout = self.config.shutdown_timeout();
            if engine.block_for_stop(Some(timeout)) == KeepGoing::Continue {
                warn!(?timeout, "delivery loop still running at release");
            }
        }
        self.stats.log_summary();
        debug!("live session released");
    }
}

/// Record path of one delivery loop. Owns the loop guard, so the session
/// learns the loop has exited when the engine drops this.
struct RecordPipeline {
    router: Router,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<SessionStats>,
    on_record: Option<RecordCallback>,
    on_event: Option<EventCallback>,
    _guard: LoopGuard,
}

impl RecordPipeline {
    fn on_record(&mut self, record: &Record<'_>) -> KeepGoing {
        let _scope = DeliveryScope::enter(&self.lifecycle);
        if self.lifecycle.stop_requested() {
            return KeepGoing::Stop;
        }
        self.stats.record_delivered(record.size());

        match panic::catch_unwind(AssertUnwindSafe(|| self.router.route(record))) {
            Ok(Ok(Some(event))) => self.forward(&event),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                self.stats.record_dispatch_error();
                warn!(rtype = record.rtype(), error = %e, "record dispatch failed");
            }
            Err(_) => {
                self.stats.record_dispatch_error();
                warn!(rtype = record.rtype(), "record dispatch panicked");
            }
        }

        let verdict = match self.on_record.as_mut() {
            Some(sink) => match panic::catch_unwind(AssertUnwindSafe(|| sink(record))) {
                Ok(verdict) => verdict,
                Err(_) => {
                    self.stats.record_callback_fault();
                    warn!(rtype = record.rtype(), "record callback panicked, stopping");
                    KeepGoing::Stop
                }
            },
            None => KeepGoing::Continue,
        };

        if self.lifecycle.stop_requested() {
            KeepGoing::Stop
        } else {
            verdict
        }
    }

    fn forward(&mut self, event: &Event) {
        let Some(sink) = self.on_event.as_mut() else {
            return;
        };
        self.stats.record_event();
        if panic::catch_unwind(AssertUnwindSafe(|| sink(event))).is_err() {
            self.stats.record_callback_fault();
            warn!(kind = %event.kind, "event callback panicked");
        }
    }
}

struct ExceptionPolicy {
    lifecycle: Arc<Lifecycle>,
    stats: Arc<SessionStats>,
    on_exception: Option<ExceptionCallback>,
}

impl ExceptionPolicy {
    fn decide(&mut self, fault: &EngineError) -> ExceptionAction {
        let _scope = DeliveryScope::enter(&self.lifecycle);
        error!(%fault, "delivery loop fault");

        // A requested stop ends the session normally whatever the policy says.
        if self.lifecycle.stop_requested() {
            return ExceptionAction::Stop;
        }

        let action = match self.on_exception.as_mut() {
            Some(policy) => match panic::catch_unwind(AssertUnwindSafe(|| policy(fault))) {
                Ok(action) => action,
                Err(_) => {
                    self.stats.record_callback_fault();
                    warn!("exception callback panicked, stopping");
                    ExceptionAction::Stop
                }
            },
            None => ExceptionAction::Stop,
        };

        match action {
            ExceptionAction::Restart => {
                self.stats.record_restart();
                self.lifecycle.note_restart();
                info!(restarts = self.lifecycle.restarts(), "restarting after fault");
            }
            ExceptionAction::Stop => {
                self.lifecycle.fault();
                warn!(state = ?self.lifecycle.state(), "session stopped after fault");
            }
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::replay::{ReplayConnector, ReplayFeed};
    use crate::enums::{SType, Schema};
    use crate::record::{SymbolMappingMsg, TradeMsg};
    use crate::error::EngineResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    /// Engine whose loop lives exactly as long as it holds the callbacks.
    /// Counts stops that land on a loop the session still reports running.
    struct LatchEngine {
        callbacks: Option<EngineCallbacks>,
        watched: Arc<Mutex<Option<Arc<Lifecycle>>>>,
        live_stops: Arc<AtomicUsize>,
    }

    impl LiveEngine for LatchEngine {
        fn subscribe(&mut self, subscription: &Subscription) -> EngineResult<()> {
            if subscription.symbols.iter().any(|s| s.starts_with("BAD")) {
                return Err(EngineError::Gateway("symbol rejected".into()));
            }
            Ok(())
        }

        fn start(&mut self, callbacks: EngineCallbacks) -> EngineResult<()> {
            self.callbacks = Some(callbacks);
            Ok(())
        }

        fn reconnect(&mut self) -> EngineResult<()> {
            Ok(())
        }

        fn resubscribe(&mut self) -> EngineResult<()> {
            Ok(())
        }

        fn stop(&mut self) {
            if self.callbacks.is_none() {
                return;
            }
            if let Some(lifecycle) = self.watched.lock().as_ref() {
                if lifecycle.state() == SessionState::Running {
                    self.live_stops.fetch_add(1, Ordering::SeqCst);
                }
            }
            self.callbacks = None;
        }

        fn block_for_stop(&mut self, _timeout: Option<Duration>) -> KeepGoing {
            if self.callbacks.is_some() {
                KeepGoing::Continue
            } else {
                KeepGoing::Stop
            }
        }
    }

    #[derive(Default)]
    struct LatchConnector {
        watched: Arc<Mutex<Option<Arc<Lifecycle>>>>,
        live_stops: Arc<AtomicUsize>,
    }

    impl Connector for LatchConnector {
        fn connect(&self, _config: &LiveConfig) -> EngineResult<Box<dyn LiveEngine>> {
            Ok(Box::new(LatchEngine {
                callbacks: None,
                watched: Arc::clone(&self.watched),
                live_stops: Arc::clone(&self.live_stops),
            }))
        }
    }

    fn latch_session(connector: &LatchConnector) -> LiveSession {
        let config = LiveConfig {
            key: "k-latch".into(),
            dataset: "GLBX.MDP3".into(),
            ..LiveConfig::default()
        };
        let session = LiveSession::connect(config, connector).unwrap();
        *connector.watched.lock() = Some(Arc::clone(&session.lifecycle));
        session
    }

    fn session(key: &str) -> (LiveSession, ReplayFeed) {
        let connector = ReplayConnector::new();
        let config = LiveConfig {
            key: key.into(),
            dataset: "GLBX.MDP3".into(),
            ..LiveConfig::default()
        };
        let session = LiveSession::connect(config, &connector).unwrap();
        let feed = connector.feed(key).unwrap();
        (session, feed)
    }

    #[test]
    fn test_start_requires_a_sink() {
        let (session, _feed) = session("k-sink");
        assert!(matches!(
            session.start(Callbacks::new()),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_symbols_resolve_after_mapping() {
        let (session, feed) = session("k-map");
        feed.push(&SymbolMappingMsg::new(100, 1, "ES.FUT", "ESZ4"));
        feed.push(&TradeMsg::new(100, 2, 4_512_250_000_000, 1));
        feed.close();

        session
            .start(Callbacks::new().on_record(|_| KeepGoing::Continue))
            .unwrap();
        assert_eq!(session.block_for_stop(WAIT), KeepGoing::Stop);
        assert_eq!(session.resolve_symbol(100).as_deref(), Some("ESZ4"));
        assert_eq!(session.stats().records, 2);
    }

    #[test]
    fn test_stop_ends_idle_loop() {
        let (session, _feed) = session("k-stop");
        session
            .start(Callbacks::new().on_record(|_| KeepGoing::Continue))
            .unwrap();
        assert!(session.is_running());
        assert_eq!(session.stop(WAIT), KeepGoing::Stop);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_event_panic_is_contained() {
        let (session, feed) = session("k-panic");
        feed.push(&TradeMsg::new(1, 0, 0, 1));
        feed.push(&TradeMsg::new(2, 0, 0, 1));
        feed.close();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        session
            .start(Callbacks::new().on_event(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("sink failure");
            }))
            .unwrap();
        assert_eq!(session.block_for_stop(WAIT), KeepGoing::Stop);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(session.stats().callback_faults, 2);
    }

    #[test]
    fn test_resubscribe_without_subscriptions() {
        let (session, _feed) = session("k-resub");
        assert!(matches!(
            session.resubscribe(),
            Err(BridgeError::NoSubscriptions("resubscribe"))
        ));
        session
            .subscribe(Subscription::new(&["ES.FUT"], Schema::Trades, SType::Parent).unwrap())
            .unwrap();
        assert!(session.resubscribe().is_ok());
        assert!(session.reconnect().is_ok());
    }

    #[test]
    fn test_stop_never_reaches_a_newer_loop() {
        let connector = LatchConnector::default();
        let session = Arc::new(latch_session(&connector));

        let workers: Vec<_> = (0..3)
            .map(|worker| {
                let session = Arc::clone(&session);
                thread::spawn(move || {
                    for _ in 0..500 {
                        if worker == 0 {
                            let callbacks = Callbacks::new().on_record(|_| KeepGoing::Continue);
                            let _ = session.start(callbacks);
                        } else {
                            session.stop(Some(Duration::ZERO));
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(connector.live_stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_engine_rejected_subscription_leaves_set_unchanged() {
        let connector = LatchConnector::default();
        let session = latch_session(&connector);
        session
            .subscribe(Subscription::new(&["ES.FUT"], Schema::Trades, SType::RawSymbol).unwrap())
            .unwrap();

        let rejected =
            Subscription::new(&["ES.FUT", "BADSYM"], Schema::Mbo, SType::RawSymbol).unwrap();
        assert!(matches!(session.subscribe(rejected), Err(BridgeError::Engine(_))));

        let registered = session.subscriptions();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].symbols, vec!["ES.FUT".to_string()]);
        assert_eq!(registered[0].schema, Schema::Trades);
    }
}
