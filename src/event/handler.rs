use async_trait::async_trait;
use thiserror::Error;

use super::events::Event;

/// Errors that can occur when handling events
///
/// The bus logs these and moves on. Nothing here reaches the publisher.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Handler timed out")]
    Timeout,

    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panic(String),
}

impl EventError {
    pub fn failed(msg: impl Into<String>) -> Self {
        EventError::Failed(msg.into())
    }
}

/// Trait for consumers of published events
///
/// Each invocation runs in its own task, concurrently with every other
/// handler subscribed to the same category. A slow handler only delays
/// itself; the bus has already moved on to the next event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Perform the side effect for one delivered event
    async fn handle(&self, event: &Event) -> Result<(), EventError>;

    /// Get a human-readable name for this handler (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// A no-op event handler for testing
pub struct NoOpEventHandler;

#[async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle(&self, _event: &Event) -> Result<(), EventError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "NoOpEventHandler"
    }
}
