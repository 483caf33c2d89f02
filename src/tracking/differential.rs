use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use crate::event::{Event, EventCategory, Metadata};

/// Identity of one ongoing activity: which process is using the device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityKey {
    pub app_name: String,
    pub pid: u32,
}

impl ActivityKey {
    pub fn new(app_name: impl Into<String>, pid: u32) -> Self {
        Self {
            app_name: app_name.into(),
            pid,
        }
    }
}

impl fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app_name, self.pid)
    }
}

/// A change between two consecutive snapshots
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Started { key: ActivityKey, metadata: Metadata },
    /// Carries the metadata last seen for the key
    Stopped { key: ActivityKey, metadata: Metadata },
}

impl Transition {
    pub fn key(&self) -> &ActivityKey {
        match self {
            Transition::Started { key, .. } => key,
            Transition::Stopped { key, .. } => key,
        }
    }

    /// Turns the transition into the matching start or stop event
    pub fn into_event(self, start: EventCategory, stop: EventCategory) -> Event {
        match self {
            Transition::Started { key, metadata } => {
                Event::new(start, key.app_name, key.pid).with_metadata_map(metadata)
            }
            Transition::Stopped { key, metadata } => {
                Event::new(stop, key.app_name, key.pid).with_metadata_map(metadata)
            }
        }
    }
}

/// Derives start/stop transitions from full "who is active" snapshots
///
/// One instance per source. Keys present in two consecutive snapshots
/// produce nothing, so repeated polling is idempotent.
///
/// With bootstrap suppression on, the first snapshot only seeds the active
/// set: activity that predates the daemon is not announced as new. Every
/// later snapshot fires transitions normally.
#[derive(Debug, Default)]
pub struct DifferentialTracker {
    active: BTreeMap<ActivityKey, Metadata>,
    bootstrapped: bool,
    suppress_bootstrap: bool,
}

impl DifferentialTracker {
    /// Tracker that reports pre-existing activity on the first snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker whose first snapshot is consumed silently
    pub fn with_bootstrap_suppression() -> Self {
        Self {
            suppress_bootstrap: true,
            ..Self::default()
        }
    }

    /// Compares `snapshot` with the active set and updates it
    ///
    /// Starts come first, then stops, each in key order. A key listed twice
    /// in one snapshot counts once (the last metadata wins). Ongoing keys
    /// keep their latest metadata so the eventual stop can repeat it.
    pub fn observe<I>(&mut self, snapshot: I) -> Vec<Transition>
    where
        I: IntoIterator<Item = (ActivityKey, Metadata)>,
    {
        let current: BTreeMap<ActivityKey, Metadata> = snapshot.into_iter().collect();

        if self.suppress_bootstrap && !self.bootstrapped {
            self.bootstrapped = true;
            self.active = current;
            return Vec::new();
        }
        self.bootstrapped = true;

        let stopped: Vec<ActivityKey> = self
            .active
            .keys()
            .filter(|key| !current.contains_key(*key))
            .cloned()
            .collect();

        let mut transitions = Vec::new();

        for (key, metadata) in current {
            match self.active.entry(key) {
                Entry::Vacant(entry) => {
                    let key = entry.key().clone();
                    entry.insert(metadata.clone());
                    transitions.push(Transition::Started { key, metadata });
                }
                Entry::Occupied(mut entry) => {
                    entry.insert(metadata);
                }
            }
        }

        for key in stopped {
            if let Some(metadata) = self.active.remove(&key) {
                transitions.push(Transition::Stopped { key, metadata });
            }
        }

        transitions
    }

    pub fn is_active(&self, key: &ActivityKey) -> bool {
        self.active.contains_key(key)
    }

    pub fn active(&self) -> impl Iterator<Item = &ActivityKey> {
        self.active.keys()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }
}
