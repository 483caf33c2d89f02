use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::event::EventCategory;

/// Names accepted in `ISLANDD_SOURCES`
pub const SOURCE_NAMES: &[&str] = &["microphone", "camera", "volume", "brightness", "battery", "media"];

/// Categories whose bursts are meaningful and never debounced
pub const DEBOUNCE_EXEMPT: [EventCategory; 3] = [
    EventCategory::VolumeChanged,
    EventCategory::BrightnessChanged,
    EventCategory::MediaChanged,
];

/// Daemon configuration, read from `ISLANDD_*` environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub queue_capacity: usize,
    pub debounce_window: Duration,
    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
    /// Empty allows every application
    pub allowed_apps: Vec<String>,
    pub handler_timeout: Duration,
    /// `None` enables every source
    pub sources: Option<Vec<String>>,
    pub poll_interval: Duration,
    pub brightness_poll_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            debounce_window: Duration::from_millis(500),
            rate_limit_max: 100,
            rate_limit_window: Duration::from_secs(60),
            allowed_apps: Vec::new(),
            handler_timeout: Duration::from_millis(5000),
            sources: None,
            poll_interval: Duration::from_millis(2000),
            brightness_poll_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_millis(2000),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; absent or invalid values keep
    /// their default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let millis = |key: &str, default: Duration| {
            Duration::from_millis(positive(&lookup, key, default.as_millis() as u64))
        };

        Self {
            queue_capacity: positive(&lookup, "ISLANDD_QUEUE_CAPACITY", defaults.queue_capacity),
            debounce_window: millis("ISLANDD_DEBOUNCE_MS", defaults.debounce_window),
            rate_limit_max: positive(&lookup, "ISLANDD_RATE_LIMIT_MAX", defaults.rate_limit_max),
            rate_limit_window: Duration::from_secs(positive(
                &lookup,
                "ISLANDD_RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window.as_secs(),
            )),
            allowed_apps: lookup("ISLANDD_ALLOWED_APPS")
                .map(|raw| list(&raw))
                .unwrap_or_default(),
            handler_timeout: millis("ISLANDD_HANDLER_TIMEOUT_MS", defaults.handler_timeout),
            sources: lookup("ISLANDD_SOURCES").and_then(|raw| sources(&raw)),
            poll_interval: millis("ISLANDD_POLL_INTERVAL_MS", defaults.poll_interval),
            brightness_poll_interval: millis(
                "ISLANDD_BRIGHTNESS_POLL_MS",
                defaults.brightness_poll_interval,
            ),
            shutdown_grace: millis("ISLANDD_SHUTDOWN_GRACE_MS", defaults.shutdown_grace),
        }
    }

    pub fn source_enabled(&self, name: &str) -> bool {
        match &self.sources {
            None => true,
            Some(enabled) => enabled.iter().any(|s| s == name),
        }
    }
}

/// Parses a strictly positive number, warning and falling back otherwise
fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            warn!(key = key, value = %raw, default = %default, "Invalid config value, using default");
            default
        }
    }
}

fn list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn sources(raw: &str) -> Option<Vec<String>> {
    let names: Vec<String> = list(raw).into_iter().map(|s| s.to_lowercase()).collect();

    if names.is_empty() || names.iter().any(|n| n == "all") {
        return None;
    }

    for name in &names {
        if !SOURCE_NAMES.contains(&name.as_str()) {
            warn!(source = %name, "Unknown source in ISLANDD_SOURCES");
        }
    }

    Some(names)
}
