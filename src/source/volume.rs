use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::command::{capture, LineStream};
use super::{EventSource, SourceError};
use crate::event::{Event, EventBus, EventCategory};
use crate::shutdown::ShutdownSignal;

const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// One read of the default output sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeReading {
    pub sink: String,
    pub level: i64,
    pub muted: bool,
}

/// Turns consecutive sink readings into volume events
///
/// The first reading and any reading from a different sink only set the
/// baseline. A mute flip wins over a level change in the same reading.
#[derive(Debug, Default)]
pub struct VolumeState {
    last: Option<VolumeReading>,
}

impl VolumeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, reading: VolumeReading) -> Option<Event> {
        let Some(last) = self.last.replace(reading.clone()) else {
            info!(level = reading.level, muted = reading.muted, sink = %reading.sink, "Initial volume");
            return None;
        };

        if last.sink != reading.sink {
            info!(from = %last.sink, to = %reading.sink, "Default sink switched");
            return None;
        }

        let category = if last.muted != reading.muted {
            if reading.muted {
                EventCategory::VolumeMuted
            } else {
                EventCategory::VolumeUnmuted
            }
        } else if last.level != reading.level {
            EventCategory::VolumeChanged
        } else {
            return None;
        };

        Some(
            Event::new(category, "volume", 0)
                .with_metadata("level", reading.level)
                .with_metadata("muted", reading.muted)
                .with_metadata("icon", volume_icon(reading.level, reading.muted))
                .with_metadata("old_level", last.level)
                .with_metadata("old_muted", last.muted),
        )
    }
}

pub fn volume_icon(level: i64, muted: bool) -> &'static str {
    if muted || level == 0 {
        return "audio-volume-muted-symbolic";
    }
    match level {
        l if l < 33 => "audio-volume-low-symbolic",
        l if l < 66 => "audio-volume-medium-symbolic",
        _ => "audio-volume-high-symbolic",
    }
}

/// First `NN%` in `pactl get-sink-volume` output
pub fn parse_volume_percent(output: &str) -> Option<i64> {
    output
        .split(|c: char| c.is_whitespace() || c == '/' || c == ',')
        .filter_map(|token| token.strip_suffix('%'))
        .find_map(|digits| digits.parse().ok())
}

/// Reports volume and mute changes on the default output sink
pub struct VolumeSource {
    state: Arc<Mutex<VolumeState>>,
}

impl VolumeSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(VolumeState::new())),
        }
    }

    async fn read() -> Result<VolumeReading, SourceError> {
        let sink = capture("pactl", &["get-default-sink"]).await?.trim().to_string();
        if sink.is_empty() {
            return Err(SourceError::Unavailable("no default sink".to_string()));
        }

        let mute = capture("pactl", &["get-sink-mute", "@DEFAULT_SINK@"]).await?;
        let volume = capture("pactl", &["get-sink-volume", "@DEFAULT_SINK@"]).await?;
        let level = parse_volume_percent(&volume)
            .ok_or_else(|| SourceError::Parse(format!("no volume in {:?}", volume.trim())))?;

        Ok(VolumeReading {
            sink,
            level,
            muted: mute.contains("yes"),
        })
    }

    async fn fetch_and_publish(state: &Mutex<VolumeState>, bus: &EventBus) {
        match Self::read().await {
            Ok(reading) => {
                if let Some(event) = state.lock().await.observe(reading) {
                    bus.publish(event);
                }
            }
            // the sink may come and go with audio devices
            Err(e) => debug!(error = %e, "Could not read default sink"),
        }
    }
}

impl Default for VolumeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for VolumeSource {
    fn name(&self) -> &'static str {
        "volume"
    }

    #[instrument(skip(self, bus, shutdown), fields(source = "volume"))]
    async fn start(
        &self,
        bus: EventBus,
        mut shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, SourceError> {
        Self::fetch_and_publish(&self.state, &bus).await;

        let mut changes = LineStream::spawn("pactl", &["subscribe"])?;
        let state = Arc::clone(&self.state);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    line = changes.next_line() => match line {
                        Some(line)
                            if line.contains("Event 'change' on sink")
                                || line.contains("Event 'new' on sink") =>
                        {
                            tokio::time::sleep(SETTLE_DELAY).await;
                            Self::fetch_and_publish(&state, &bus).await;
                        }
                        Some(_) => {}
                        None => {
                            warn!("pactl subscribe exited");
                            break;
                        }
                    }
                }
            }

            changes.shutdown().await;
            info!("Volume source stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn reading(sink: &str, level: i64, muted: bool) -> VolumeReading {
        VolumeReading {
            sink: sink.to_string(),
            level,
            muted,
        }
    }

    #[test]
    fn test_first_reading_is_silent() {
        let mut state = VolumeState::new();

        assert!(state.observe(reading("speakers", 40, false)).is_none());
    }

    #[test]
    fn test_level_change_emits_volume_changed() {
        let mut state = VolumeState::new();
        state.observe(reading("speakers", 40, false));

        let event = state.observe(reading("speakers", 55, false)).unwrap();

        assert_eq!(event.category, EventCategory::VolumeChanged);
        assert_eq!(event.app_name, "volume");
        assert_eq!(event.pid, 0);
        assert_eq!(event.metadata["level"], json!(55));
        assert_eq!(event.metadata["old_level"], json!(40));
        assert_eq!(event.metadata["icon"], json!("audio-volume-medium-symbolic"));
    }

    #[test]
    fn test_mute_flip_wins_over_level_change() {
        let mut state = VolumeState::new();
        state.observe(reading("speakers", 40, false));

        let muted = state.observe(reading("speakers", 45, true)).unwrap();
        assert_eq!(muted.category, EventCategory::VolumeMuted);
        assert_eq!(muted.metadata["old_muted"], json!(false));

        let unmuted = state.observe(reading("speakers", 45, false)).unwrap();
        assert_eq!(unmuted.category, EventCategory::VolumeUnmuted);
    }

    #[test]
    fn test_sink_switch_rebaselines_silently() {
        let mut state = VolumeState::new();
        state.observe(reading("speakers", 40, false));

        assert!(state.observe(reading("headphones", 90, true)).is_none());

        let event = state.observe(reading("headphones", 80, true)).unwrap();
        assert_eq!(event.metadata["old_level"], json!(90));
    }

    #[test]
    fn test_identical_reading_is_silent() {
        let mut state = VolumeState::new();
        state.observe(reading("speakers", 40, false));

        assert!(state.observe(reading("speakers", 40, false)).is_none());
    }

    #[rstest]
    #[case(50, true, "audio-volume-muted-symbolic")]
    #[case(0, false, "audio-volume-muted-symbolic")]
    #[case(32, false, "audio-volume-low-symbolic")]
    #[case(33, false, "audio-volume-medium-symbolic")]
    #[case(65, false, "audio-volume-medium-symbolic")]
    #[case(66, false, "audio-volume-high-symbolic")]
    #[case(150, false, "audio-volume-high-symbolic")]
    fn test_volume_icon(#[case] level: i64, #[case] muted: bool, #[case] expected: &str) {
        assert_eq!(volume_icon(level, muted), expected);
    }

    #[rstest]
    #[case("Volume: front-left: 32768 /  50% / -18.06 dB,   front-right: 32768 /  50% / -18.06 dB", Some(50))]
    #[case("Volume: mono: 65536 / 100% / 0.00 dB", Some(100))]
    #[case("Volume: front-left: 0 /   0% / -inf dB", Some(0))]
    #[case("", None)]
    fn test_parse_volume_percent(#[case] output: &str, #[case] expected: Option<i64>) {
        assert_eq!(parse_volume_percent(output), expected);
    }
}
