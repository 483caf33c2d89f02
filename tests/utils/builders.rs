use islandd::event::{Event, EventCategory};

/// Event with the given origin and no metadata
#[allow(dead_code)]
pub fn event(category: EventCategory, app_name: &str, pid: u32) -> Event {
    Event::new(category, app_name, pid)
}

/// `count` events of one category from distinct apps `app-0`, `app-1`, ...
#[allow(dead_code)]
pub fn events_from(category: EventCategory, count: u32) -> Vec<Event> {
    (0..count)
        .map(|i| event(category, &format!("app-{i}"), 1000 + i))
        .collect()
}
