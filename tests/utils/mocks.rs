use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use islandd::event::{Event, EventContext, EventError, EventHandler};
use islandd::middleware::{Middleware, Rejection};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// Handler that keeps every event it receives
#[derive(Clone)]
pub struct RecordingHandler {
    received: Arc<RwLock<Vec<Event>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self {
            received: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn received(&self) -> Vec<Event> {
        self.received.read().await.clone()
    }

    pub async fn app_names(&self) -> Vec<String> {
        self.received
            .read()
            .await
            .iter()
            .map(|e| e.app_name.clone())
            .collect()
    }

    /// Waits until at least `count` events arrived, or gives up after `limit`
    pub async fn wait_for(&self, count: usize, limit: Duration) -> Vec<Event> {
        let _ = tokio::time::timeout(limit, async {
            while self.received.read().await.len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        self.received().await
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) -> Result<(), EventError> {
        self.received.write().await.push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RecordingHandler"
    }
}

/// Middleware that records the order it sees events in and can refuse apps
#[allow(dead_code)]
#[derive(Clone)]
pub struct RecordingMiddleware {
    seen: Arc<RwLock<Vec<String>>>,
    refused: Arc<HashSet<String>>,
}

#[allow(dead_code)]
impl RecordingMiddleware {
    pub fn new() -> Self {
        Self::refusing(&[])
    }

    pub fn refusing(apps: &[&str]) -> Self {
        Self {
            seen: Arc::new(RwLock::new(Vec::new())),
            refused: Arc::new(apps.iter().map(|a| a.to_string()).collect()),
        }
    }

    pub async fn seen(&self) -> Vec<String> {
        self.seen.read().await.clone()
    }
}

#[async_trait]
impl Middleware for RecordingMiddleware {
    fn name(&self) -> &'static str {
        "Recording"
    }

    async fn process(
        &self,
        ctx: EventContext,
        event: &mut Event,
    ) -> Result<EventContext, Rejection> {
        self.seen.write().await.push(event.app_name.clone());

        if self.refused.contains(&event.app_name) {
            return Err(Rejection::Other(format!("{} refused", event.app_name)));
        }
        Ok(ctx.with("recording.seen", true))
    }
}
