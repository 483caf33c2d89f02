use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;
use tracing::debug;

use crate::event::{Event, EventError, EventHandler};

/// Wire form of one event: the five fields of the desktop signal
#[derive(Debug, Serialize)]
struct Signal<'a> {
    event_type: &'a str,
    app_name: &'a str,
    pid: u32,
    timestamp: String,
    /// Metadata object, itself JSON-encoded
    metadata: String,
}

/// Writes every delivered event as one JSON line
pub struct SignalEmitter<W> {
    writer: Mutex<W>,
}

impl<W> SignalEmitter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_writer(self) -> W {
        self.writer.into_inner()
    }

    /// Serializes an event to its line, without the trailing newline
    pub fn encode(event: &Event) -> Result<String, serde_json::Error> {
        let signal = Signal {
            event_type: event.category.as_ref(),
            app_name: &event.app_name,
            pid: event.pid,
            timestamp: event.timestamp.to_rfc3339(),
            metadata: serde_json::to_string(&event.metadata)?,
        };
        serde_json::to_string(&signal)
    }
}

impl SignalEmitter<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> EventHandler for SignalEmitter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn handle(&self, event: &Event) -> Result<(), EventError> {
        let mut line = Self::encode(event)
            .map_err(|e| EventError::failed(format!("Failed to encode event: {e}")))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EventError::failed(format!("Failed to write signal: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| EventError::failed(format!("Failed to flush signal: {e}")))?;

        debug!(event_id = %event.id, category = %event.category, "Signal emitted");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SignalEmitter"
    }
}
