use async_trait::async_trait;
use tracing::info;

use super::chain::{Middleware, Rejection};
use crate::event::{Event, EventContext};

/// Logs every event that reaches it; never rejects
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "Logger"
    }

    async fn process(
        &self,
        ctx: EventContext,
        event: &mut Event,
    ) -> Result<EventContext, Rejection> {
        let phase = if event.category.is_stop() { "end" } else { "begin" };

        info!(
            event_id = %event.id,
            category = %event.category,
            app_name = %event.app_name,
            pid = event.pid,
            phase = phase,
            metadata = %serde_json::Value::Object(event.metadata.clone()),
            "Event accepted"
        );

        Ok(ctx)
    }
}
