//! Session lifecycle controller
//!
//! ```text
//! Idle -> Starting -> Running -> StopRequested -> Idle
//!            \           \
//!             +-----------+--> Faulted (terminal)
//! ```
//!
//! `begin_start` is the only transition taken outside the transition lock: a
//! single compare-and-set out of `Idle`, so concurrent starts have exactly one
//! winner. Every other transition happens under the lock and wakes waiters.
//! The running and stop-requested flags are both views of the one atomic
//! state word.

use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::debug;

use crate::enums::KeepGoing;
use crate::error::{BridgeError, Result};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    StopRequested = 3,
    Faulted = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Idle,
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::StopRequested,
            _ => SessionState::Faulted,
        }
    }

    /// A delivery loop exists or is being created
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Running | SessionState::StopRequested
        )
    }
}

thread_local! {
    static DELIVERING_FOR: Cell<*const Lifecycle> = const { Cell::new(ptr::null()) };
}

/// Marks the current thread as running callbacks of one session until dropped
pub struct DeliveryScope {
    previous: *const Lifecycle,
}

impl DeliveryScope {
    pub fn enter(lifecycle: &Lifecycle) -> Self {
        let current: *const Lifecycle = lifecycle;
        DeliveryScope {
            previous: DELIVERING_FOR.with(|slot| slot.replace(current)),
        }
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERING_FOR.with(|slot| slot.set(self.previous));
    }
}

#[derive(Default)]
struct Pending {
    exited_while_starting: bool,
    stop_while_starting: bool,
}

pub struct Lifecycle {
    state: AtomicU8,
    restarts: AtomicU32,
    pending: Mutex<Pending>,
    changed: Condvar,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle {
            state: AtomicU8::new(SessionState::Idle as u8),
            restarts: AtomicU32::new(0),
            pending: Mutex::new(Pending::default()),
            changed: Condvar::new(),
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn stop_requested(&self) -> bool {
        self.state() == SessionState::StopRequested
    }

    /// True while inside one of this session's callbacks
    pub fn on_delivery_thread(&self) -> bool {
        DELIVERING_FOR.with(|slot| ptr::eq(slot.get(), self))
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    fn set(&self, from: SessionState, to: SessionState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!(?from, ?to, "session state changed");
        }
        moved
    }

    /// Claim the session for a new delivery loop
    pub fn begin_start(self: &Arc<Self>) -> Result<StartAttempt> {
        match self.state.compare_exchange(
            SessionState::Idle as u8,
            SessionState::Starting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            // `pending` was cleared by the previous `finish_start`; a stop
            // queued from here on must survive until this start completes.
            Ok(_) => Ok(StartAttempt {
                lifecycle: Arc::clone(self),
                finished: false,
            }),
            Err(s) if s == SessionState::Faulted as u8 => Err(BridgeError::Faulted),
            Err(_) => Err(BridgeError::AlreadyRunning),
        }
    }

    fn finish_start(&self, ok: bool) {
        let mut pending = self.pending.lock();
        let next = if !ok {
            SessionState::Faulted
        } else if pending.exited_while_starting {
            SessionState::Idle
        } else if pending.stop_while_starting {
            SessionState::StopRequested
        } else {
            SessionState::Running
        };
        *pending = Pending::default();
        self.set(SessionState::Starting, next);
        self.changed.notify_all();
    }

    fn on_loop_exit(&self) {
        let mut pending = self.pending.lock();
        match self.state() {
            SessionState::Starting => pending.exited_while_starting = true,
            SessionState::Running => {
                self.set(SessionState::Running, SessionState::Idle);
            }
            SessionState::StopRequested => {
                self.set(SessionState::StopRequested, SessionState::Idle);
            }
            SessionState::Idle | SessionState::Faulted => {}
        }
        self.changed.notify_all();
    }

    /// The exception policy declined to restart. An already requested stop
    /// wins and the session returns to `Idle` instead.
    pub fn fault(&self) {
        let _pending = self.pending.lock();
        match self.state() {
            SessionState::Starting => {
                self.set(SessionState::Starting, SessionState::Faulted);
            }
            SessionState::Running => {
                self.set(SessionState::Running, SessionState::Faulted);
            }
            _ => {}
        }
        self.changed.notify_all();
    }

    pub fn note_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Signal cooperative cancellation without waiting.
    /// A stop on a starting session takes effect once it is running.
    pub fn request_stop(&self) {
        let mut pending = self.pending.lock();
        match self.state() {
            SessionState::Running => {
                self.set(SessionState::Running, SessionState::StopRequested);
                self.changed.notify_all();
            }
            SessionState::Starting => pending.stop_while_starting = true,
            _ => {}
        }
    }

    /// Request cancellation and wait for the loop to exit
    pub fn stop(&self, timeout: Option<Duration>) -> KeepGoing {
        self.request_stop();
        self.wait_for_stop(timeout)
    }

    /// Wait until no delivery loop is active. `None` waits without bound.
    /// Returns `Continue` if a loop is still active when the wait ends.
    /// Never blocks when called from a session callback.
    pub fn wait_for_stop(&self, timeout: Option<Duration>) -> KeepGoing {
        let mut pending = self.pending.lock();
        if !self.state().is_active() {
            return KeepGoing::Stop;
        }
        if self.on_delivery_thread() {
            return KeepGoing::Continue;
        }

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        while self.state().is_active() {
            match (timeout, deadline) {
                (Some(_), Some(deadline)) => {
                    if self.changed.wait_until(&mut pending, deadline).timed_out() {
                        break;
                    }
                }
                _ => self.changed.wait(&mut pending),
            }
        }

        if self.state().is_active() {
            KeepGoing::Continue
        } else {
            KeepGoing::Stop
        }
    }

    pub fn ensure_usable(&self) -> Result<()> {
        if self.state() == SessionState::Faulted {
            return Err(BridgeError::Faulted);
        }
        Ok(())
    }

    /// Fail unless no loop is active
    pub fn ensure_idle(&self, op: &'static str) -> Result<()> {
        match self.state() {
            SessionState::Idle => Ok(()),
            SessionState::Faulted => Err(BridgeError::Faulted),
            _ => Err(BridgeError::LoopActive(op)),
        }
    }
}

/// An in-flight start. Dropping it without completing faults the session so
/// that a failure between claim and completion cannot leave it `Starting`.
pub struct StartAttempt {
    lifecycle: Arc<Lifecycle>,
    finished: bool,
}

impl StartAttempt {
    /// Guard to hand to the delivery loop; dropping it marks the loop exited
    pub fn loop_guard(&self) -> LoopGuard {
        LoopGuard {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    pub fn succeeded(mut self) {
        self.finished = true;
        self.lifecycle.finish_start(true);
    }

    pub fn failed(mut self) {
        self.finished = true;
        self.lifecycle.finish_start(false);
    }
}

impl Drop for StartAttempt {
    fn drop(&mut self) {
        if !self.finished {
            self.lifecycle.finish_start(false);
        }
    }
}

pub struct LoopGuard {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.lifecycle.on_loop_exit();
    }
}
