use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::command::{capture, LineStream};
use super::{EventSource, SourceError};
use crate::event::{EventBus, EventCategory, Metadata};
use crate::shutdown::ShutdownSignal;
use crate::tracking::{ActivityKey, DifferentialTracker};

/// Audio plumbing that keeps a capture stream open without a user behind it
const IGNORED_CLIENTS: &[&str] = &[
    "pulseeffects",
    "easyeffects",
    "pulseaudio",
    "pipewire",
    "gnome shell",
    "gnome-shell",
];

const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Reports which applications are recording from a microphone
///
/// Listens to `pactl subscribe` and re-reads the full list of capture
/// streams on every source-output change. Streams already open when the
/// daemon starts are not announced.
pub struct MicrophoneSource {
    tracker: Arc<Mutex<DifferentialTracker>>,
}

impl MicrophoneSource {
    pub fn new() -> Self {
        Self {
            tracker: Arc::new(Mutex::new(DifferentialTracker::with_bootstrap_suppression())),
        }
    }

    async fn snapshot() -> Vec<(ActivityKey, Metadata)> {
        match capture("pactl", &["list", "source-outputs"]).await {
            Ok(output) => snapshot_from(&output),
            Err(e) => {
                warn!(error = %e, "Failed to list capture streams");
                Vec::new()
            }
        }
    }

    async fn check_and_publish(tracker: &Mutex<DifferentialTracker>, bus: &EventBus) {
        let snapshot = Self::snapshot().await;
        let transitions = tracker.lock().await.observe(snapshot);

        for transition in transitions {
            bus.publish(
                transition.into_event(EventCategory::MicrophoneStart, EventCategory::MicrophoneStop),
            );
        }
    }
}

impl Default for MicrophoneSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for MicrophoneSource {
    fn name(&self) -> &'static str {
        "microphone"
    }

    #[instrument(skip(self, bus, shutdown), fields(source = "microphone"))]
    async fn start(
        &self,
        bus: EventBus,
        mut shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, SourceError> {
        // seed the active set before listening
        Self::check_and_publish(&self.tracker, &bus).await;

        let mut changes = LineStream::spawn("pactl", &["subscribe"])?;
        let tracker = Arc::clone(&self.tracker);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    line = changes.next_line() => match line {
                        Some(line) if line.contains("source-output") => {
                            tokio::time::sleep(SETTLE_DELAY).await;
                            Self::check_and_publish(&tracker, &bus).await;
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
            info!("Microphone source stopped");
        }))
    }
}

/// Tracker input for one `pactl list source-outputs` listing
fn snapshot_from(output: &str) -> Vec<(ActivityKey, Metadata)> {
    parse_source_outputs(output)
        .into_iter()
        .map(|key| {
            let mut metadata = Metadata::new();
            metadata.insert("device".to_string(), "microphone".into());
            (key, metadata)
        })
        .collect()
}

/// Extracts the recording applications from `pactl list source-outputs`
///
/// The name comes from `application.name`, falling back to the client name.
/// Streams with neither a name nor a pid are skipped, as are known audio
/// daemons.
pub fn parse_source_outputs(output: &str) -> Vec<ActivityKey> {
    let mut keys = Vec::new();
    let mut block: Option<Vec<&str>> = None;

    for line in output.lines() {
        if line.starts_with("Source Output #") {
            if let Some(lines) = block.take() {
                keys.extend(parse_block(&lines));
            }
            block = Some(Vec::new());
        }
        if let Some(lines) = block.as_mut() {
            lines.push(line);
        }
    }

    if let Some(lines) = block {
        keys.extend(parse_block(&lines));
    }

    keys
}

fn parse_block(lines: &[&str]) -> Option<ActivityKey> {
    let mut app_name = None;
    let mut client_name = None;
    let mut pid = None;

    for line in lines.iter().map(|l| l.trim()) {
        if let Some(value) = property(line, "application.name") {
            app_name.get_or_insert(value.to_string());
        } else if let Some(value) = property(line, "application.process.id") {
            pid = pid.or_else(|| value.parse::<u32>().ok());
        } else if let Some(value) = line.strip_prefix("Client Name:") {
            client_name.get_or_insert(value.trim().to_string());
        }
    }

    let name = app_name.filter(|n| !n.is_empty()).or(client_name);
    if name.is_none() && pid.is_none() {
        return None;
    }
    let name = name.unwrap_or_else(|| "unknown".to_string());

    if IGNORED_CLIENTS.contains(&name.to_lowercase().as_str()) {
        debug!(app = %name, "Ignoring audio daemon stream");
        return None;
    }

    Some(ActivityKey::new(name, pid.unwrap_or(0)))
}

/// Value of a `key = "value"` property line
fn property<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (name, value) = line.split_once('=')?;
    if name.trim() != key {
        return None;
    }
    Some(value.trim().trim_matches('"'))
}
