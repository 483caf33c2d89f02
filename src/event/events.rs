use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Free-form event payload, keyed by a per-category convention
pub type Metadata = serde_json::Map<String, Value>;

/// Kinds of desktop state change the daemon knows about
///
/// Categories are fixed at compile time. Sources must only publish these.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventCategory {
    // Device activation
    MicrophoneStart,
    MicrophoneStop,
    CameraStart,
    CameraStop,

    // Connectivity
    BluetoothConnected,
    BluetoothDisconnected,

    Notification,

    // Levels
    VolumeChanged,
    VolumeMuted,
    VolumeUnmuted,
    BrightnessChanged,

    MediaChanged,
    BatteryChanged,
}

impl EventCategory {
    /// Whether this category marks the end of some ongoing activity
    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            EventCategory::MicrophoneStop
                | EventCategory::CameraStop
                | EventCategory::BluetoothDisconnected
        )
    }
}

/// Request-scoped values that middleware stages hand to each other
///
/// The bus clones the event's context into the chain and writes the result
/// back only once every stage has accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventContext {
    values: HashMap<String, Value>,
}

impl EventContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context with `key` set, replacing any previous value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Reads a boolean flag; absent or non-boolean values are `false`
    pub fn flag(&self, key: &str) -> bool {
        self.values
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A single observed state change
///
/// Events represent facts that have already happened. They are created by a
/// source at detection time, pass through the bus once and are dropped after
/// every handler has seen them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// `"{unix_nanos}-{app_name}-{pid}"`. Two events from the same origin in
    /// the same clock tick share an id, so this is not a dedup key.
    pub id: String,
    pub category: EventCategory,
    pub app_name: String,
    /// 0 when the origin is not a process
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub metadata: Metadata,

    #[serde(skip)]
    context: EventContext,
}

impl Event {
    /// Creates an event stamped with the current time
    pub fn new(category: EventCategory, app_name: impl Into<String>, pid: u32) -> Self {
        Self::at(category, app_name, pid, Utc::now())
    }

    /// Creates an event with an explicit timestamp
    pub fn at(
        category: EventCategory,
        app_name: impl Into<String>,
        pid: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let app_name = app_name.into();
        let nanos = timestamp.timestamp_nanos_opt().unwrap_or_default();

        Self {
            id: format!("{}-{}-{}", nanos, app_name, pid),
            category,
            app_name,
            pid,
            timestamp,
            metadata: Metadata::new(),
            context: EventContext::default(),
        }
    }

    /// Builder-style metadata insert
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merges a whole metadata map, overwriting existing keys
    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn context(&self) -> &EventContext {
        &self.context
    }

    pub fn set_context(&mut self, context: EventContext) {
        self.context = context;
    }
}
