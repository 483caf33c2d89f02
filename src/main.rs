use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use islandd::config::DEBOUNCE_EXEMPT;
use islandd::event::{EventBus, EventCategory, EventHandler};
use islandd::handlers::SignalEmitter;
use islandd::middleware::{
    DebounceMiddleware, EnrichmentMiddleware, FilterMiddleware, LoggingMiddleware,
    RateLimitMiddleware,
};
use islandd::source::{
    BatterySource, BrightnessSource, CameraSource, EventSource, MediaSource, MicrophoneSource,
    SourceSupervisor, VolumeSource,
};
use islandd::{AppError, Config};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "islandd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    info!(config = ?config, "Starting islandd");

    let bus = EventBus::new(config.queue_capacity).with_handler_timeout(config.handler_timeout);

    bus.use_middleware(Arc::new(
        DebounceMiddleware::new(config.debounce_window).excluding(DEBOUNCE_EXEMPT),
    ))
    .await;
    bus.use_middleware(Arc::new(RateLimitMiddleware::new(
        config.rate_limit_max,
        config.rate_limit_window,
    )))
    .await;
    if !config.allowed_apps.is_empty() {
        bus.use_middleware(Arc::new(FilterMiddleware::new(config.allowed_apps.clone())))
            .await;
    }
    bus.use_middleware(Arc::new(EnrichmentMiddleware::new())).await;
    bus.use_middleware(Arc::new(LoggingMiddleware)).await;

    // events go to stdout, logs to stderr
    let emitter: Arc<dyn EventHandler> = Arc::new(SignalEmitter::stdout());
    for category in EventCategory::iter() {
        bus.subscribe(category, Arc::clone(&emitter)).await;
    }

    let coordinator = bus.start()?;

    let candidates: Vec<Arc<dyn EventSource>> = vec![
        Arc::new(MicrophoneSource::new()),
        Arc::new(CameraSource::new(config.poll_interval)),
        Arc::new(VolumeSource::new()),
        Arc::new(BrightnessSource::new(config.brightness_poll_interval)),
        Arc::new(BatterySource::new(config.poll_interval)),
        Arc::new(MediaSource::new()),
    ];

    let mut supervisor = SourceSupervisor::new();
    for source in candidates {
        if config.source_enabled(source.name()) {
            supervisor.register(source);
        } else {
            info!(source = source.name(), "Source disabled");
        }
    }

    let failures = supervisor.start_all(&bus).await;
    if supervisor.running().is_empty() {
        error!(failed = failures.len(), "No source could be started");
        bus.stop();
        return Err(AppError::nothing_running(failures));
    }
    info!(running = ?supervisor.running(), "Sources running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    supervisor.shutdown(config.shutdown_grace).await;
    bus.stop();
    if let Err(e) = coordinator.await {
        warn!(error = %e, "Coordinator task failed");
    }

    info!(stats = ?bus.stats(), "Event bus stopped");
    Ok(())
}
