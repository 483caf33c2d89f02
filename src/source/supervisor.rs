use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use super::{EventSource, SourceError};
use crate::event::EventBus;
use crate::shutdown::Shutdown;

/// Starts sources and stops them together
///
/// A source that fails to start is logged and skipped; the others keep
/// running.
pub struct SourceSupervisor {
    sources: Vec<Arc<dyn EventSource>>,
    running: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: Shutdown,
}

impl SourceSupervisor {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            running: Vec::new(),
            shutdown: Shutdown::new(),
        }
    }

    pub fn register(&mut self, source: Arc<dyn EventSource>) {
        self.sources.push(source);
    }

    /// Starts every registered source, returning the ones that failed
    #[instrument(skip(self, bus), fields(sources = self.sources.len()))]
    pub async fn start_all(&mut self, bus: &EventBus) -> Vec<(&'static str, SourceError)> {
        let mut failures = Vec::new();

        for source in self.sources.drain(..) {
            let name = source.name();
            match source.start(bus.clone(), self.shutdown.signal()).await {
                Ok(handle) => {
                    info!(source = name, "Source started");
                    self.running.push((name, handle));
                }
                Err(e) => {
                    error!(source = name, error = %e, "Source failed to start");
                    failures.push((name, e));
                }
            }
        }

        failures
    }

    /// Names of sources that started successfully
    pub fn running(&self) -> Vec<&'static str> {
        self.running.iter().map(|(name, _)| *name).collect()
    }

    /// Signals every source to stop and waits up to `grace` for them
    ///
    /// Tasks still running after the grace period are aborted.
    #[instrument(skip(self), fields(running = self.running.len()))]
    pub async fn shutdown(self, grace: Duration) {
        self.shutdown.trigger();
        let deadline = Instant::now() + grace;

        for (name, mut handle) in self.running {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(source = name, "Source stopped"),
                Ok(Err(e)) => error!(source = name, error = %e, "Source task failed"),
                Err(_) => {
                    warn!(source = name, "Source did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl Default for SourceSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownSignal;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct CooperativeSource {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EventSource for CooperativeSource {
        fn name(&self) -> &'static str {
            "cooperative"
        }

        async fn start(
            &self,
            _bus: EventBus,
            mut shutdown: ShutdownSignal,
        ) -> Result<JoinHandle<()>, SourceError> {
            let stopped = Arc::clone(&self.stopped);
            Ok(tokio::spawn(async move {
                shutdown.recv().await;
                stopped.store(true, Ordering::SeqCst);
            }))
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl EventSource for BrokenSource {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn start(
            &self,
            _bus: EventBus,
            _shutdown: ShutdownSignal,
        ) -> Result<JoinHandle<()>, SourceError> {
            Err(SourceError::Unavailable("no device".to_string()))
        }
    }

    struct StubbornSource;

    #[async_trait]
    impl EventSource for StubbornSource {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        async fn start(
            &self,
            _bus: EventBus,
            _shutdown: ShutdownSignal,
        ) -> Result<JoinHandle<()>, SourceError> {
            Ok(tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }))
        }
    }

    #[tokio::test]
    async fn test_failed_source_does_not_block_others() {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut supervisor = SourceSupervisor::new();
        supervisor.register(Arc::new(BrokenSource));
        supervisor.register(Arc::new(CooperativeSource {
            stopped: Arc::clone(&stopped),
        }));

        let failures = supervisor.start_all(&EventBus::new(10)).await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken");
        assert_eq!(supervisor.running(), vec!["cooperative"]);

        supervisor.shutdown(Duration::from_secs(1)).await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_sources_that_ignore_the_signal() {
        let mut supervisor = SourceSupervisor::new();
        supervisor.register(Arc::new(StubbornSource));
        supervisor.start_all(&EventBus::new(10)).await;

        let started = Instant::now();
        supervisor.shutdown(Duration::from_millis(200)).await;

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    /// Layer collecting the names of spans as they open
    #[derive(Clone, Default)]
    struct SpanNames(Arc<std::sync::Mutex<Vec<&'static str>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanNames {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.0.lock().unwrap().push(attrs.metadata().name());
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown_open_spans() {
        use tracing_subscriber::layer::SubscriberExt;

        let names = SpanNames::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(names.clone()));

        let mut supervisor = SourceSupervisor::new();
        supervisor.register(Arc::new(CooperativeSource {
            stopped: Arc::new(AtomicBool::new(false)),
        }));
        supervisor.start_all(&EventBus::new(10)).await;
        supervisor.shutdown(Duration::from_secs(1)).await;

        let names = names.0.lock().unwrap().clone();
        assert!(names.contains(&"start_all"));
        assert!(names.contains(&"shutdown"));
    }
}
