use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, instrument, trace, warn};

use super::command::LineStream;
use super::{EventSource, SourceError};
use crate::event::{Event, EventBus, EventCategory, Metadata};
use crate::shutdown::ShutdownSignal;
use crate::tracking::CoalescingTimer;

const BATCH_DELAY: Duration = Duration::from_millis(50);
const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";

/// MPRIS names exposed by input devices and headsets, not media players
const NON_PLAYER_PATTERNS: &[&str] = &["bluetooth", "mouse", "keyboard", "input", "device"];

const STATUS_FORMAT: &str = "{{playerName}}\t{{status}}";
const METADATA_FORMAT: &str = "{{playerName}}\t{{title}}\t{{artist}}\t{{album}}\t{{mpris:artUrl}}";

/// One line of playerctl output, interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum MediaUpdate {
    /// Some fields of the current player's state
    Partial(Metadata),
    /// No player is running
    NoPlayer,
    /// Not a media player, or a line we cannot read
    Ignored,
}

fn is_media_player(name: &str) -> bool {
    let name = name.to_lowercase();
    !NON_PLAYER_PATTERNS.iter().any(|pattern| name.contains(pattern))
}

fn split_line(line: &str, fields: usize) -> Result<Vec<&str>, MediaUpdate> {
    if line.trim().is_empty() {
        return Err(MediaUpdate::NoPlayer);
    }

    let parts: Vec<&str> = line.splitn(fields, '\t').collect();
    if parts.len() != fields || parts[0].is_empty() {
        return Err(MediaUpdate::Ignored);
    }
    if !is_media_player(parts[0]) {
        return Err(MediaUpdate::Ignored);
    }
    Ok(parts)
}

fn partial(player: &str, fields: &[(&str, &str)]) -> MediaUpdate {
    let mut metadata = Metadata::new();
    metadata.insert("player".to_string(), format!("{MPRIS_PREFIX}{player}").into());
    for (key, value) in fields {
        metadata.insert(key.to_string(), value.to_string().into());
    }
    MediaUpdate::Partial(metadata)
}

/// Parses a line of `playerctl --follow status` in [`STATUS_FORMAT`]
pub fn parse_status_line(line: &str) -> MediaUpdate {
    match split_line(line, 2) {
        Ok(parts) => partial(parts[0], &[("status", parts[1].trim())]),
        Err(update) => update,
    }
}

/// Parses a line of `playerctl --follow metadata` in [`METADATA_FORMAT`]
pub fn parse_metadata_line(line: &str) -> MediaUpdate {
    match split_line(line, 5) {
        Ok(parts) => partial(
            parts[0],
            &[
                ("title", parts[1]),
                ("artist", parts[2]),
                ("album", parts[3]),
                ("artUrl", parts[4].trim()),
            ],
        ),
        Err(update) => update,
    }
}

/// Builds the `media_changed` event for a settled player state
///
/// An empty state (no player) gives the cleared event: empty origin and
/// empty fields.
pub fn media_event(state: &Metadata) -> Event {
    let field = |key: &str| {
        state
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let player = field("player");
    if player.is_empty() {
        let mut event = Event::new(EventCategory::MediaChanged, "", 0);
        for key in ["status", "title", "artist", "album", "artUrl", "player"] {
            event.metadata.insert(key.to_string(), "".into());
        }
        return event;
    }

    let app_name = match player.trim_start_matches(MPRIS_PREFIX) {
        "" => "unknown".to_string(),
        name => name.to_string(),
    };
    let status = field("status");

    Event::new(EventCategory::MediaChanged, app_name, 0)
        .with_metadata("isPlaying", status == "Playing")
        .with_metadata("status", status)
        .with_metadata("title", field("title"))
        .with_metadata("artist", field("artist"))
        .with_metadata("album", field("album"))
        .with_metadata("artUrl", field("artUrl"))
        .with_metadata("player", player)
}

/// Applies one update to the coalescing timer
///
/// Returns `true` when the update means there is no player any more.
fn apply(timer: &CoalescingTimer, update: MediaUpdate) -> bool {
    match update {
        MediaUpdate::Partial(fields) => {
            let switched = timer
                .merged()
                .get("player")
                .is_some_and(|current| Some(current) != fields.get("player"));
            if switched {
                trace!("Player switched, dropping previous state");
                timer.reset();
            }
            timer.update(fields);
            false
        }
        MediaUpdate::NoPlayer => {
            timer.reset();
            true
        }
        MediaUpdate::Ignored => false,
    }
}

/// Reports what the active media player is playing
///
/// Status and metadata arrive on separate playerctl streams and a track
/// change touches both, so updates are merged for a short quiet period
/// before one event goes out.
pub struct MediaSource;

impl MediaSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MediaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for MediaSource {
    fn name(&self) -> &'static str {
        "media"
    }

    #[instrument(skip(self, bus, shutdown), fields(source = "media"))]
    async fn start(
        &self,
        bus: EventBus,
        mut shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, SourceError> {
        let mut status = LineStream::spawn("playerctl", &["--follow", "status", "--format", STATUS_FORMAT])?;
        let mut metadata =
            LineStream::spawn("playerctl", &["--follow", "metadata", "--format", METADATA_FORMAT])?;

        let settle_bus = bus.clone();
        let timer = CoalescingTimer::new(BATCH_DELAY, move |state| {
            settle_bus.publish(media_event(&state));
        });

        Ok(tokio::spawn(async move {
            let mut status_open = true;
            let mut metadata_open = true;
            let mut cleared = false;

            while status_open || metadata_open {
                let update = tokio::select! {
                    _ = shutdown.recv() => break,
                    line = status.next_line(), if status_open => match line {
                        Some(line) => parse_status_line(&line),
                        None => {
                            warn!("playerctl status follower exited");
                            status_open = false;
                            continue;
                        }
                    },
                    line = metadata.next_line(), if metadata_open => match line {
                        Some(line) => parse_metadata_line(&line),
                        None => {
                            warn!("playerctl metadata follower exited");
                            metadata_open = false;
                            continue;
                        }
                    },
                };

                if apply(&timer, update) {
                    // both followers report the empty state; announce it once
                    if !cleared {
                        bus.publish(media_event(&Metadata::new()));
                        cleared = true;
                    }
                } else if !timer.merged().is_empty() {
                    cleared = false;
                }
            }

            timer.cancel();
            status.shutdown().await;
            metadata.shutdown().await;
            info!("Media source stopped");
        }))
    }
}
