use async_trait::async_trait;
use std::collections::HashSet;

use super::chain::{Middleware, Rejection};
use crate::event::{Event, EventContext};

/// Only lets through events from an allow-list of applications
///
/// An empty list allows everything.
pub struct FilterMiddleware {
    allowed_apps: HashSet<String>,
}

impl FilterMiddleware {
    pub fn new<I, S>(allowed_apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_apps: allowed_apps.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, app_name: &str) -> bool {
        self.allowed_apps.is_empty() || self.allowed_apps.contains(app_name)
    }
}

#[async_trait]
impl Middleware for FilterMiddleware {
    fn name(&self) -> &'static str {
        "Filter"
    }

    async fn process(
        &self,
        ctx: EventContext,
        event: &mut Event,
    ) -> Result<EventContext, Rejection> {
        if !self.allows(&event.app_name) {
            return Err(Rejection::NotAllowed {
                app_name: event.app_name.clone(),
            });
        }

        Ok(ctx.with("filter.allowed", true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventCategory;
    use rstest::rstest;

    #[rstest]
    #[case(&[], "anything", true)]
    #[case(&["zoom", "obs"], "zoom", true)]
    #[case(&["zoom", "obs"], "obs", true)]
    #[case(&["zoom", "obs"], "firefox", false)]
    #[case(&["zoom"], "Zoom", false)] // case-sensitive
    fn test_allow_list(#[case] allowed: &[&str], #[case] app: &str, #[case] expected: bool) {
        let filter = FilterMiddleware::new(allowed.iter().copied());
        assert_eq!(filter.allows(app), expected);
    }

    #[tokio::test]
    async fn test_rejection_names_the_app() {
        let filter = FilterMiddleware::new(["zoom"]);
        let mut event = Event::new(EventCategory::CameraStart, "firefox", 12);

        let err = filter
            .process(EventContext::new(), &mut event)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Rejection::NotAllowed {
                app_name: "firefox".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_accepted_event_is_flagged() {
        let filter = FilterMiddleware::new(Vec::<String>::new());
        let mut event = Event::new(EventCategory::CameraStart, "firefox", 12);

        let ctx = filter.process(EventContext::new(), &mut event).await.unwrap();
        assert!(ctx.flag("filter.allowed"));
    }
}
