use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::event::{Event, EventContext};

/// Why a middleware stage refused an event
///
/// Rejections are the normal output of filtering stages, not failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("debounced (within {window:?})")]
    Debounced { window: Duration },

    #[error("rate limit exceeded: {max} events in {window:?}")]
    RateLimited { max: usize, window: Duration },

    #[error("app {app_name} not in allowed list")]
    NotAllowed { app_name: String },

    #[error("{0}")]
    Other(String),
}

/// A single stage in the bus pipeline
///
/// Stages see the event before any handler does. They may read or replace the
/// context, edit metadata, or reject the event outright.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Get a human-readable name for this stage (for logging/debugging)
    fn name(&self) -> &'static str;

    /// Accept the event by returning the (possibly new) context, or reject it
    async fn process(
        &self,
        ctx: EventContext,
        event: &mut Event,
    ) -> Result<EventContext, Rejection>;
}

/// A rejection together with the stage that issued it
#[derive(Debug, Clone, PartialEq, Error)]
#[error("middleware {stage} rejected event: {reason}")]
pub struct StageRejection {
    pub stage: &'static str,
    pub reason: Rejection,
}

/// Ordered list of middleware stages
///
/// Stages run in insertion order. The first rejection stops the chain, so
/// later stages never observe (or record state for) a rejected event.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Arc<dyn Middleware>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs every stage against `event`
    ///
    /// The context is threaded from stage to stage and stored back on the
    /// event only if all of them accept.
    pub async fn run(&self, event: &mut Event) -> Result<(), StageRejection> {
        let mut ctx = event.context().clone();

        for stage in &self.stages {
            ctx = stage
                .process(ctx, event)
                .await
                .map_err(|reason| StageRejection {
                    stage: stage.name(),
                    reason,
                })?;
        }

        event.set_context(ctx);
        Ok(())
    }
}
