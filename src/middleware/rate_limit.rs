use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::chain::{Middleware, Rejection};
use crate::event::{Event, EventCategory, EventContext};

#[derive(Default)]
struct RateLimitState {
    /// Acceptance times per category, oldest first
    windows: HashMap<EventCategory, VecDeque<Instant>>,
    excluded: HashSet<EventCategory>,
}

/// Sliding-window cap on accepted events per category
///
/// Bounds total volume regardless of origin, so a burst spread over many
/// processes still cannot flood handlers.
pub struct RateLimitMiddleware {
    max_events: usize,
    window: Duration,
    state: Mutex<RateLimitState>,
}

impl RateLimitMiddleware {
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            max_events,
            window,
            state: Mutex::new(RateLimitState::default()),
        }
    }

    pub fn excluding(mut self, categories: impl IntoIterator<Item = EventCategory>) -> Self {
        self.state.get_mut().excluded.extend(categories);
        self
    }

    pub async fn exclude(&self, category: EventCategory) {
        self.state.lock().await.excluded.insert(category);
    }

    /// Accepted events for `category` still inside the window
    pub async fn in_window(&self, category: EventCategory) -> usize {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .windows
            .get(&category)
            .map(|times| {
                times
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "RateLimit"
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
        let times = state.windows.entry(event.category).or_default();

        while let Some(oldest) = times.front() {
            if now.duration_since(*oldest) >= self.window {
                times.pop_front();
            } else {
                break;
            }
        }

        if times.len() >= self.max_events {
            return Err(Rejection::RateLimited {
                max: self.max_events,
                window: self.window,
            });
        }

        times.push_back(now);
        Ok(ctx.with("rate_limit.checked", true))
    }
}
