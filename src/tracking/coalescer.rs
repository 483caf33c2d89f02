//! Trailing-edge coalescing of partial updates.
//!
//! Some signals describe one logical change as a burst of small updates (a
//! track change arrives as a status update plus one or more metadata
//! updates). The coalescer merges the burst and emits once, a fixed delay
//! after the last update.
//!
//! # States
//!
//! ```text
//!            update                      delay elapsed
//!   Idle ───────────────▶ Armed(n) ─────────────────────▶ Idle  (emit)
//!                          │  ▲
//!                   update │  │ re-arm as Armed(n+1)
//!                          └──┘
//!   any ── cancel ──▶ Cancelled   (terminal: updates are ignored)
//! ```
//!
//! A timer task only emits if the state is still `Armed` with its own
//! generation. A timer that wakes just as a new update arrives finds a newer
//! generation and exits quietly.
//!
//! The settle callback runs with the timer's lock held, so it must not call
//! back into the timer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::event::Metadata;

/// Callback receiving the settled, fully merged state
pub type SettleFn = Arc<dyn Fn(Metadata) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed { generation: u64 },
    Cancelled,
}

struct Inner {
    merged: Metadata,
    state: TimerState,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

/// Merges bursts of partial updates into one settled notification
#[derive(Clone)]
pub struct CoalescingTimer {
    delay: Duration,
    inner: Arc<Mutex<Inner>>,
    on_settle: SettleFn,
}

impl CoalescingTimer {
    pub fn new(delay: Duration, on_settle: impl Fn(Metadata) + Send + Sync + 'static) -> Self {
        Self {
            delay,
            inner: Arc::new(Mutex::new(Inner {
                merged: Metadata::new(),
                state: TimerState::Idle,
                generation: 0,
                pending: None,
            })),
            on_settle: Arc::new(on_settle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merges `partial` and (re)arms the timer
    ///
    /// Fields absent from `partial` keep their previous value. Must be called
    /// from within a tokio runtime.
    pub fn update(&self, partial: Metadata) {
        let mut inner = self.lock();

        if inner.state == TimerState::Cancelled {
            trace!("Update after cancel ignored");
            return;
        }

        inner.merged.extend(partial);
        inner.generation += 1;
        let generation = inner.generation;

        if let Some(pending) = inner.pending.take() {
            pending.abort();
        }
        inner.state = TimerState::Armed { generation };

        let delay = self.delay;
        let shared = Arc::clone(&self.inner);
        let on_settle = Arc::clone(&self.on_settle);
        inner.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::fire(&shared, generation, &on_settle);
        }));
    }

    fn fire(shared: &Mutex<Inner>, generation: u64, on_settle: &SettleFn) {
        let mut inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state != (TimerState::Armed { generation }) {
            trace!(generation = generation, "Stale coalescing timer");
            return;
        }
        inner.state = TimerState::Idle;
        inner.pending = None;

        // held until the callback returns so cancel() waits for it
        on_settle(inner.merged.clone());
    }

    /// Drops merged state and any pending emission, staying usable
    pub fn reset(&self) {
        let mut inner = self.lock();
        if let Some(pending) = inner.pending.take() {
            pending.abort();
        }
        inner.merged.clear();
        if inner.state != TimerState::Cancelled {
            inner.state = TimerState::Idle;
        }
    }

    /// Permanently disarms the timer; nothing fires after this returns
    ///
    /// An emission already in progress finishes before this returns.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if let Some(pending) = inner.pending.take() {
            pending.abort();
        }
        inner.state = TimerState::Cancelled;
    }

    pub fn state(&self) -> TimerState {
        self.lock().state
    }

    /// Current merged fields, whether or not they have been emitted
    pub fn merged(&self) -> Metadata {
        self.lock().merged.clone()
    }
}
