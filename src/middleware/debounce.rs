use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::chain::{Middleware, Rejection};
use crate::event::{Event, EventCategory, EventContext};

/// Past this many keys, entries older than the window are swept on insert
const SWEEP_THRESHOLD: usize = 1024;

/// Identity used for debouncing: one category from one process
type DebounceKey = (EventCategory, String, u32);

#[derive(Default)]
struct DebounceState {
    last_accepted: HashMap<DebounceKey, Instant>,
    excluded: HashSet<EventCategory>,
}

/// Collapses repeated events from the same origin within a window
///
/// A flapping signal (the same app toggling the same device several times a
/// second) is reduced to its first occurrence per window.
pub struct DebounceMiddleware {
    window: Duration,
    state: Mutex<DebounceState>,
}

impl DebounceMiddleware {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(DebounceState::default()),
        }
    }

    /// Construction-time exemptions
    pub fn excluding(mut self, categories: impl IntoIterator<Item = EventCategory>) -> Self {
        self.state.get_mut().excluded.extend(categories);
        self
    }

    /// Exempts a category at runtime
    pub async fn exclude(&self, category: EventCategory) {
        self.state.lock().await.excluded.insert(category);
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[async_trait]
impl Middleware for DebounceMiddleware {
    fn name(&self) -> &'static str {
        "Debounce"
    }

    async fn process(
        &self,
        ctx: EventContext,
        event: &mut Event,
    ) -> Result<EventContext, Rejection> {
        let mut state = self.state.lock().await;

        if state.excluded.contains(&event.category) {
            return Ok(ctx);
        }

        let now = Instant::now();
        let key = (event.category, event.app_name.clone(), event.pid);

        if let Some(last) = state.last_accepted.get(&key) {
            if now.duration_since(*last) < self.window {
                trace!(event_id = %event.id, "Event inside debounce window");
                return Err(Rejection::Debounced {
                    window: self.window,
                });
            }
        }

        if state.last_accepted.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            state
                .last_accepted
                .retain(|_, seen| now.duration_since(*seen) < window);
        }
        state.last_accepted.insert(key, now);

        Ok(ctx.with("debounce.checked", true))
    }
}
