// Event sources: the producers that watch the system and publish events
//
// Each source owns its tracking state and runs as one background task that
// ends when the shutdown signal fires.

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::event::EventBus;
use crate::shutdown::ShutdownSignal;

// Public API - what other modules can use
pub use battery::{BatteryReading, BatterySource, BatteryState};
pub use brightness::{brightness_event, brightness_icon, BrightnessSource};
pub use camera::CameraSource;
pub use media::{media_event, parse_metadata_line, parse_status_line, MediaSource, MediaUpdate};
pub use microphone::{parse_source_outputs, MicrophoneSource};
pub use supervisor::SourceSupervisor;
pub use volume::{parse_volume_percent, volume_icon, VolumeReading, VolumeSource, VolumeState};

// Internal modules
mod battery;
mod brightness;
mod camera;
mod command;
mod media;
mod microphone;
mod supervisor;
mod volume;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to run {program}: {source}")]
    Command {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    CommandStatus { program: String, status: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// A producer of events
///
/// `start` does its setup (initial readings, spawning helper processes) and
/// fails fast if the source cannot work on this machine. On success it
/// returns the task that keeps publishing until `shutdown` fires.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start(
        &self,
        bus: EventBus,
        shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, SourceError>;
}
