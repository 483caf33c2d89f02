use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use super::{EventSource, SourceError};
use crate::event::{Event, EventBus, EventCategory};
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatteryReading {
    pub percentage: i64,
    pub status: String,
    pub present: bool,
}

impl BatteryReading {
    /// Plugged in, whether still charging or already full
    pub fn is_charging(&self) -> bool {
        matches!(self.status.as_str(), "Charging" | "Full")
    }
}

/// Publishes on the first reading and whenever charge, charging or presence
/// changes
#[derive(Debug, Default)]
pub struct BatteryState {
    last: Option<(i64, bool, bool)>,
}

impl BatteryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, reading: &BatteryReading) -> Option<Event> {
        let current = (reading.percentage, reading.is_charging(), reading.present);
        if self.last == Some(current) {
            return None;
        }
        self.last = Some(current);

        info!(
            percentage = reading.percentage,
            charging = reading.is_charging(),
            present = reading.present,
            "Battery changed"
        );

        Some(
            Event::new(EventCategory::BatteryChanged, "system", 0)
                .with_metadata("percentage", reading.percentage)
                .with_metadata("isCharging", reading.is_charging())
                .with_metadata("isPresent", reading.present)
                .with_metadata("status", reading.status.clone()),
        )
    }
}

/// Reports battery charge from the power-supply class directory
pub struct BatterySource {
    power_supply_root: PathBuf,
    poll_interval: Duration,
}

impl BatterySource {
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_root(poll_interval, "/sys/class/power_supply")
    }

    pub fn with_root(poll_interval: Duration, power_supply_root: impl Into<PathBuf>) -> Self {
        Self {
            power_supply_root: power_supply_root.into(),
            poll_interval,
        }
    }

    async fn battery(&self) -> Result<PathBuf, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.power_supply_root).await?;
        let mut batteries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with("BAT") {
                batteries.push(entry.path());
            }
        }
        batteries.sort();

        batteries
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::Unavailable("no battery".to_string()))
    }

    async fn read(battery: &Path) -> Result<BatteryReading, SourceError> {
        let capacity = tokio::fs::read_to_string(battery.join("capacity")).await?;
        let percentage = capacity
            .trim()
            .parse()
            .map_err(|_| SourceError::Parse(format!("capacity {:?}", capacity.trim())))?;

        let status = tokio::fs::read_to_string(battery.join("status"))
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "Unknown".to_string());

        // drivers without a `present` file only expose batteries that exist
        let present = tokio::fs::read_to_string(battery.join("present"))
            .await
            .map(|s| s.trim() == "1")
            .unwrap_or(true);

        Ok(BatteryReading {
            percentage,
            status,
            present,
        })
    }

    async fn check_and_publish(state: &mut BatteryState, battery: &Path, bus: &EventBus) {
        match Self::read(battery).await {
            Ok(reading) => {
                if let Some(event) = state.observe(&reading) {
                    bus.publish(event);
                }
            }
            Err(e) => debug!(error = %e, "Could not read battery"),
        }
    }
}

#[async_trait]
impl EventSource for BatterySource {
    fn name(&self) -> &'static str {
        "battery"
    }

    #[instrument(skip(self, bus, shutdown), fields(source = "battery"))]
    async fn start(
        &self,
        bus: EventBus,
        mut shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, SourceError> {
        let battery = self.battery().await?;
        let mut state = BatteryState::new();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    // the first tick completes immediately
                    _ = ticker.tick() => {
                        Self::check_and_publish(&mut state, &battery, &bus).await;
                    }
                }
            }
            info!("Battery source stopped");
        }))
    }
}
