use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, trace};

use super::{
    bus::BusCounters,
    events::{Event, EventCategory},
    handler::{EventError, EventHandler},
};
use crate::middleware::MiddlewareChain;
use crate::shutdown::ShutdownSignal;

pub(crate) type HandlerRegistry = HashMap<EventCategory, Vec<Arc<dyn EventHandler>>>;

/// The bus coordinator
///
/// Exactly one dispatcher runs per bus. It dequeues events in FIFO order,
/// runs the middleware chain on each, and hands accepted events to every
/// subscribed handler in its own task. Because only this task evaluates
/// middleware, stage state is never raced by two events at once.
pub(crate) struct EventDispatcher {
    pub(crate) subscribers: Arc<RwLock<HandlerRegistry>>,
    pub(crate) middleware: Arc<RwLock<MiddlewareChain>>,
    pub(crate) counters: Arc<BusCounters>,
    pub(crate) handler_timeout: Duration,
}

impl EventDispatcher {
    /// Runs until the stop signal fires or every sender is gone
    ///
    /// Stop wins over pending work: events still queued when it fires are
    /// abandoned, not drained.
    pub(crate) async fn run(self, mut receiver: mpsc::Receiver<Event>, mut stop: ShutdownSignal) {
        info!(
            timeout_ms = self.handler_timeout.as_millis() as u64,
            "Starting event dispatcher"
        );

        loop {
            tokio::select! {
                biased;
                _ = stop.recv() => break,
                next = receiver.recv() => match next {
                    Some(event) => self.process_event(event).await,
                    None => break,
                },
            }
        }

        info!(
            abandoned = receiver.len(),
            "Event dispatcher stopped listening"
        );
    }

    /// Middleware, then fan-out
    pub(crate) async fn process_event(&self, mut event: Event) {
        let chain = self.middleware.read().await.clone();

        if let Err(rejection) = chain.run(&mut event).await {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(
                event_id = %event.id,
                category = %event.category,
                middleware = rejection.stage,
                reason = %rejection.reason,
                "Middleware blocked event"
            );
            return;
        }

        let handlers = self
            .subscribers
            .read()
            .await
            .get(&event.category)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            trace!(category = %event.category, "No handlers for event");
            return;
        }

        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        debug!(
            event_id = %event.id,
            category = %event.category,
            "Dispatching event to {} handlers",
            handlers.len()
        );

        let event = Arc::new(event);
        for handler in handlers {
            let event = Arc::clone(&event);
            let counters = Arc::clone(&self.counters);
            let handler_timeout = self.handler_timeout;

            // Spawn each handler in its own task for isolation
            tokio::spawn(async move {
                if let Err(e) = Self::invoke(handler.as_ref(), &event, handler_timeout).await {
                    counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        handler = handler.name(),
                        event_id = %event.id,
                        category = %event.category,
                        error = %e,
                        "Handler failed"
                    );
                }
            });
        }
    }

    /// One bounded, panic-isolated handler call
    async fn invoke(
        handler: &dyn EventHandler,
        event: &Event,
        handler_timeout: Duration,
    ) -> Result<(), EventError> {
        let call = AssertUnwindSafe(handler.handle(event)).catch_unwind();

        match timeout(handler_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(EventError::Panic(panic_message(panic))),
            Err(_elapsed) => Err(EventError::Timeout),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::handler::NoOpEventHandler;
    use async_trait::async_trait;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

    struct SlowHandler;

    #[async_trait]
    impl EventHandler for SlowHandler {
        async fn handle(&self, _event: &Event) -> Result<(), EventError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "SlowHandler"
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _event: &Event) -> Result<(), EventError> {
            panic!("handler exploded");
        }

        fn name(&self) -> &'static str {
            "PanickingHandler"
        }
    }

    struct ReportingHandler(UnboundedSender<String>);

    #[async_trait]
    impl EventHandler for ReportingHandler {
        async fn handle(&self, event: &Event) -> Result<(), EventError> {
            self.0.send(event.id.clone()).ok();
            Ok(())
        }

        fn name(&self) -> &'static str {
            "ReportingHandler"
        }
    }

    fn dispatcher(registry: HandlerRegistry) -> EventDispatcher {
        EventDispatcher {
            subscribers: Arc::new(RwLock::new(registry)),
            middleware: Arc::new(RwLock::new(MiddlewareChain::new())),
            counters: Arc::new(BusCounters::default()),
            handler_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_times_out_slow_handler() {
        let event = Event::new(EventCategory::CameraStart, "zoom", 1);
        let result = EventDispatcher::invoke(&SlowHandler, &event, Duration::from_millis(100)).await;

        assert!(matches!(result, Err(EventError::Timeout)));
    }

    #[tokio::test]
    async fn test_invoke_converts_panic_to_error() {
        let event = Event::new(EventCategory::CameraStart, "zoom", 1);
        let result =
            EventDispatcher::invoke(&PanickingHandler, &event, Duration::from_secs(1)).await;

        match result {
            Err(EventError::Panic(msg)) => assert_eq!(msg, "handler exploded"),
            other => panic!("expected panic error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_sibling_does_not_block_delivery() {
        let (tx, mut rx) = unbounded_channel();
        let mut registry = HandlerRegistry::new();
        registry.insert(
            EventCategory::CameraStart,
            vec![
                Arc::new(PanickingHandler) as Arc<dyn EventHandler>,
                Arc::new(ReportingHandler(tx)),
                Arc::new(NoOpEventHandler),
            ],
        );
        let dispatcher = dispatcher(registry);

        let event = Event::new(EventCategory::CameraStart, "zoom", 1);
        let id = event.id.clone();
        dispatcher.process_event(event).await;

        let delivered = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(delivered, Some(id));
        assert_eq!(dispatcher.counters.delivered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_category_is_not_counted_as_delivered() {
        let dispatcher = dispatcher(HandlerRegistry::new());

        dispatcher
            .process_event(Event::new(EventCategory::BatteryChanged, "system", 0))
            .await;

        assert_eq!(dispatcher.counters.delivered.load(Ordering::Relaxed), 0);
    }
}
