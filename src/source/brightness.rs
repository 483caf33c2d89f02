use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{EventSource, SourceError};
use crate::event::{Event, EventBus, EventCategory};
use crate::shutdown::ShutdownSignal;
use crate::tracking::{MagnitudeGuard, Reading};

/// Largest step, in percent, a user adjustment produces between two polls
const MAX_BRIGHTNESS_JUMP: u64 = 5;

pub fn brightness_icon(level: i64) -> &'static str {
    match level {
        l if l < 30 => "display-brightness-low-symbolic",
        l if l < 70 => "display-brightness-medium-symbolic",
        _ => "display-brightness-high-symbolic",
    }
}

pub fn brightness_event(previous: i64, current: i64) -> Event {
    Event::new(EventCategory::BrightnessChanged, "system", 0)
        .with_metadata("level", current)
        .with_metadata("old_level", previous)
        .with_metadata("icon", brightness_icon(current))
}

/// Reports screen backlight changes
///
/// Polls the first device under the backlight class directory. A single
/// large jump is an echo from firmware or the compositor and is dropped. One
/// that holds on the next poll is a fast drag and is reported.
pub struct BrightnessSource {
    backlight_root: PathBuf,
    poll_interval: Duration,
}

impl BrightnessSource {
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_root(poll_interval, "/sys/class/backlight")
    }

    pub fn with_root(poll_interval: Duration, backlight_root: impl Into<PathBuf>) -> Self {
        Self {
            backlight_root: backlight_root.into(),
            poll_interval,
        }
    }

    async fn device(&self) -> Result<PathBuf, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.backlight_root).await?;
        let mut devices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            devices.push(entry.path());
        }
        devices.sort();

        devices
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::Unavailable("no backlight device".to_string()))
    }

    async fn read_percent(device: &Path) -> Result<i64, SourceError> {
        let current = read_number(&device.join("brightness")).await?;
        let max = read_number(&device.join("max_brightness")).await?;
        if max <= 0 {
            return Err(SourceError::Parse(format!("max_brightness is {max}")));
        }
        Ok((current * 100 + max / 2) / max)
    }

    async fn check_and_publish(guard: &mut MagnitudeGuard, device: &Path, bus: &EventBus) {
        let percent = match Self::read_percent(device).await {
            Ok(percent) => percent,
            Err(e) => {
                debug!(error = %e, "Could not read brightness");
                return;
            }
        };

        match guard.check(percent) {
            Reading::Baseline(level) => info!(level = level, "Initial brightness"),
            Reading::Unchanged(_) => {}
            Reading::Accepted { previous, current } | Reading::Confirmed { previous, current } => {
                bus.publish(brightness_event(previous, current));
            }
            Reading::Rejected { baseline, reading } => {
                debug!(
                    baseline = baseline,
                    reading = reading,
                    "Brightness jump ignored"
                );
            }
        }
    }
}

async fn read_number(path: &Path) -> Result<i64, SourceError> {
    let raw = tokio::fs::read_to_string(path).await?;
    raw.trim()
        .parse()
        .map_err(|_| SourceError::Parse(format!("{}: {:?}", path.display(), raw.trim())))
}

#[async_trait]
impl EventSource for BrightnessSource {
    fn name(&self) -> &'static str {
        "brightness"
    }

    #[instrument(skip(self, bus, shutdown), fields(source = "brightness"))]
    async fn start(
        &self,
        bus: EventBus,
        mut shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, SourceError> {
        let device = self.device().await?;
        let mut guard = MagnitudeGuard::confirming_repeats(MAX_BRIGHTNESS_JUMP);
        Self::check_and_publish(&mut guard, &device, &bus).await;

        if guard.baseline().is_none() {
            warn!(device = %device.display(), "Backlight unreadable, will keep trying");
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        Self::check_and_publish(&mut guard, &device, &bus).await;
                    }
                }
            }
            info!("Brightness source stopped");
        }))
    }
}
