// Library crate for the islandd desktop event daemon
// This file exposes the public API for the binary and integration tests

pub mod config;
pub mod event;
pub mod handlers;
pub mod middleware;
pub mod shared;
pub mod shutdown;
pub mod source;
pub mod tracking;

// Re-export commonly used types for easier access in tests
pub use config::Config;
pub use event::{BusStats, Event, EventBus, EventCategory, EventHandler};
pub use handlers::SignalEmitter;
pub use middleware::{Middleware, MiddlewareChain};
pub use shared::AppError;
pub use shutdown::{Shutdown, ShutdownSignal};
pub use source::{EventSource, SourceSupervisor};
