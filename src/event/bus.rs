use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    dispatcher::{EventDispatcher, HandlerRegistry},
    events::{Event, EventCategory},
    handler::EventHandler,
};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::shutdown::Shutdown;

/// Default ingress queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default upper bound on a single handler invocation
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Event bus already started")]
    AlreadyStarted,
}

#[derive(Debug, Default)]
pub(crate) struct BusCounters {
    pub(crate) published: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) handler_failures: AtomicU64,
}

/// Point-in-time copy of a bus's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Events accepted into the ingress queue
    pub published: u64,
    /// Events lost because the queue was full or the bus had stopped
    pub dropped: u64,
    /// Events refused by a middleware stage
    pub rejected: u64,
    /// Events handed to at least one handler
    pub delivered: u64,
    pub handler_failures: u64,
}

/// Event bus for distributing events throughout the daemon
///
/// Sources `publish` into a bounded queue and never wait. A single
/// coordinator (see [`EventBus::start`]) pulls from the queue, runs the
/// middleware chain and fans accepted events out to handlers.
///
/// **Overload drops events.** When the queue is full, `publish` discards the
/// event, logs it and bumps [`BusStats::dropped`]. This is the one place the
/// bus loses data on purpose: a stuck consumer must never stall a producer.
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<Event>,
    /// Taken by the coordinator on start
    receiver: Arc<Mutex<Option<mpsc::Receiver<Event>>>>,
    subscribers: Arc<RwLock<HandlerRegistry>>,
    middleware: Arc<RwLock<MiddlewareChain>>,
    counters: Arc<BusCounters>,
    shutdown: Arc<Shutdown>,
    handler_timeout: Duration,
    capacity: usize,
}

impl EventBus {
    /// Creates a new event bus with the specified queue capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            sender,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            subscribers: Arc::new(RwLock::new(HandlerRegistry::new())),
            middleware: Arc::new(RwLock::new(MiddlewareChain::new())),
            counters: Arc::new(BusCounters::default()),
            shutdown: Arc::new(Shutdown::new()),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }

    /// Set the timeout for individual handler execution
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Registers a handler for one category
    ///
    /// Meant for configuration time. Late registration is safe but only
    /// affects events dispatched afterwards.
    pub async fn subscribe(&self, category: EventCategory, handler: Arc<dyn EventHandler>) {
        info!(
            handler_name = handler.name(),
            category = %category,
            "Registering event handler"
        );
        self.subscribers
            .write()
            .await
            .entry(category)
            .or_default()
            .push(handler);
    }

    /// Appends a stage to the middleware chain; call order is run order
    pub async fn use_middleware(&self, stage: Arc<dyn Middleware>) {
        info!(middleware = stage.name(), "Adding middleware");
        self.middleware.write().await.push(stage);
    }

    /// Enqueues an event without waiting
    ///
    /// Fire-and-forget: a full queue or a stopped bus drops the event. The
    /// caller is never told, only the logs and [`BusStats`] are.
    pub fn publish(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_id = %event.id,
                    category = %event.category,
                    capacity = self.capacity,
                    "Event bus queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    event_id = %event.id,
                    category = %event.category,
                    "Event bus stopped, dropping event"
                );
            }
        }
    }

    /// Spawns the single coordinator task
    pub fn start(&self) -> Result<JoinHandle<()>, BusError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BusError::AlreadyStarted)?;

        let dispatcher = EventDispatcher {
            subscribers: Arc::clone(&self.subscribers),
            middleware: Arc::clone(&self.middleware),
            counters: Arc::clone(&self.counters),
            handler_timeout: self.handler_timeout,
        };

        Ok(tokio::spawn(
            dispatcher.run(receiver, self.shutdown.signal()),
        ))
    }

    /// Signals the coordinator to exit; queued events are not processed
    pub fn stop(&self) {
        info!(queued = self.queued(), "Stopping event bus");
        self.shutdown.trigger();
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// Events currently waiting in the queue
    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handlers currently registered for `category`
    pub async fn handler_count(&self, category: EventCategory) -> usize {
        self.subscribers
            .read()
            .await
            .get(&category)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn middleware_names(&self) -> Vec<&'static str> {
        self.middleware.read().await.names()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
