// Event-driven architecture components
//
// This module provides the event model and the bus that carries events from
// sources, through the middleware chain, to handlers.

// Public API - what other modules can use
pub use bus::{BusError, BusStats, EventBus, DEFAULT_HANDLER_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
pub use events::{Event, EventCategory, EventContext, Metadata};
pub use handler::{EventError, EventHandler, NoOpEventHandler};

// Internal modules
mod bus;
mod dispatcher;
mod events;
mod handler;
