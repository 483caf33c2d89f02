mod utils;

use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;

use islandd::config::DEBOUNCE_EXEMPT;
use islandd::event::{EventBus, EventCategory};
use islandd::middleware::{
    DebounceMiddleware, EnrichmentMiddleware, FilterMiddleware, LoggingMiddleware,
    RateLimitMiddleware,
};
use utils::{event, events_from, RecordingHandler, RecordingMiddleware};

const WAIT: Duration = Duration::from_secs(2);

async fn subscribe_all(bus: &EventBus, handler: &RecordingHandler) {
    for category in EventCategory::iter() {
        bus.subscribe(category, Arc::new(handler.clone())).await;
    }
}

fn expected_apps(count: u32) -> Vec<String> {
    (0..count).map(|i| format!("app-{i}")).collect()
}

#[tokio::test]
async fn test_events_pass_middleware_in_publish_order() {
    let bus = EventBus::new(100);
    let middleware = RecordingMiddleware::new();
    let handler = RecordingHandler::new();
    bus.use_middleware(Arc::new(middleware.clone())).await;
    subscribe_all(&bus, &handler).await;
    bus.start().unwrap();

    for e in events_from(EventCategory::MicrophoneStart, 20) {
        bus.publish(e);
    }

    let received = handler.wait_for(20, WAIT).await;
    assert_eq!(received.len(), 20);
    assert_eq!(middleware.seen().await, expected_apps(20));

    // handlers run concurrently, so only the set is guaranteed
    let mut delivered = handler.app_names().await;
    delivered.sort();
    let mut expected = expected_apps(20);
    expected.sort();
    assert_eq!(delivered, expected);

    assert!(received.iter().all(|e| e.context().flag("recording.seen")));
    bus.stop();
}

#[tokio::test]
async fn test_overload_drops_exactly_the_excess() {
    let bus = EventBus::new(5);
    let middleware = RecordingMiddleware::new();
    let handler = RecordingHandler::new();
    bus.use_middleware(Arc::new(middleware.clone())).await;
    subscribe_all(&bus, &handler).await;

    // nothing consumes until start, so the queue fills up
    for e in events_from(EventCategory::CameraStart, 8) {
        bus.publish(e);
    }

    let stats = bus.stats();
    assert_eq!(stats.published, 5);
    assert_eq!(stats.dropped, 3);
    assert_eq!(bus.queued(), 5);

    bus.start().unwrap();
    let received = handler.wait_for(5, WAIT).await;

    assert_eq!(received.len(), 5);
    assert_eq!(middleware.seen().await, expected_apps(5));
    bus.stop();
}

#[tokio::test]
async fn test_rejected_event_never_reaches_handlers() {
    let bus = EventBus::new(10);
    let handler = RecordingHandler::new();
    bus.use_middleware(Arc::new(RecordingMiddleware::refusing(&["spyware"])))
        .await;
    subscribe_all(&bus, &handler).await;
    bus.start().unwrap();

    bus.publish(event(EventCategory::MicrophoneStart, "spyware", 66));
    bus.publish(event(EventCategory::MicrophoneStart, "zoom", 7));

    handler.wait_for(1, WAIT).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(handler.app_names().await, vec!["zoom"]);
    assert_eq!(bus.stats().rejected, 1);
    assert_eq!(bus.stats().delivered, 1);
    bus.stop();
}

#[tokio::test]
async fn test_later_stages_do_not_see_rejected_events() {
    let bus = EventBus::new(10);
    let first = RecordingMiddleware::refusing(&["blocked"]);
    let second = RecordingMiddleware::new();
    let handler = RecordingHandler::new();
    bus.use_middleware(Arc::new(first.clone())).await;
    bus.use_middleware(Arc::new(second.clone())).await;
    subscribe_all(&bus, &handler).await;
    bus.start().unwrap();

    bus.publish(event(EventCategory::Notification, "blocked", 1));
    bus.publish(event(EventCategory::Notification, "mail", 2));
    handler.wait_for(1, WAIT).await;

    assert_eq!(first.seen().await, vec!["blocked", "mail"]);
    assert_eq!(second.seen().await, vec!["mail"]);
    bus.stop();
}

#[tokio::test]
async fn test_stop_abandons_queued_events() {
    let bus = EventBus::new(20);
    let middleware = RecordingMiddleware::new();
    let handler = RecordingHandler::new();
    bus.use_middleware(Arc::new(middleware.clone())).await;
    subscribe_all(&bus, &handler).await;

    for e in events_from(EventCategory::VolumeChanged, 10) {
        bus.publish(e);
    }
    bus.stop();

    let coordinator = bus.start().unwrap();
    tokio::time::timeout(WAIT, coordinator)
        .await
        .expect("coordinator should exit promptly after stop")
        .unwrap();

    assert!(middleware.seen().await.is_empty());
    assert!(handler.received().await.is_empty());

    // the queue is gone with the coordinator
    bus.publish(event(EventCategory::VolumeChanged, "late", 0));
    assert_eq!(bus.stats().dropped, 1);
}

#[tokio::test]
async fn test_default_chain_end_to_end() {
    let bus = EventBus::new(100);
    bus.use_middleware(Arc::new(
        DebounceMiddleware::new(Duration::from_millis(500)).excluding(DEBOUNCE_EXEMPT),
    ))
    .await;
    bus.use_middleware(Arc::new(RateLimitMiddleware::new(3, Duration::from_secs(60))))
        .await;
    bus.use_middleware(Arc::new(FilterMiddleware::new(["zoom", "volume"])))
        .await;
    bus.use_middleware(Arc::new(EnrichmentMiddleware::with_proc_root(
        "/nonexistent/islandd-proc",
    )))
    .await;
    bus.use_middleware(Arc::new(LoggingMiddleware)).await;

    assert_eq!(
        bus.middleware_names().await,
        vec!["Debounce", "RateLimit", "Filter", "Enrichment", "Logger"]
    );

    let handler = RecordingHandler::new();
    subscribe_all(&bus, &handler).await;
    bus.start().unwrap();

    bus.publish(event(EventCategory::MicrophoneStart, "zoom", 1));
    // same origin inside the window
    bus.publish(event(EventCategory::MicrophoneStart, "zoom", 1));
    // not on the allow-list
    bus.publish(event(EventCategory::MicrophoneStart, "skype", 2));
    // exempt from debounce, but only three fit the rate limit
    for level in [10, 20, 30, 40] {
        bus.publish(
            event(EventCategory::VolumeChanged, "volume", 0).with_metadata("level", level),
        );
    }

    let received = handler.wait_for(4, WAIT).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(received.len(), 4);
    assert_eq!(bus.stats().rejected, 3);

    let mic = received
        .iter()
        .find(|e| e.category == EventCategory::MicrophoneStart)
        .unwrap();
    assert_eq!(mic.app_name, "zoom");
    assert!(mic.context().flag("debounce.checked"));
    assert!(mic.context().flag("rate_limit.checked"));
    assert!(mic.context().flag("filter.allowed"));

    let mut levels: Vec<i64> = received
        .iter()
        .filter(|e| e.category == EventCategory::VolumeChanged)
        .filter_map(|e| e.metadata.get("level").and_then(|v| v.as_i64()))
        .collect();
    levels.sort();
    assert_eq!(levels, vec![10, 20, 30]);
    bus.stop();
}
