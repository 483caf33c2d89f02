// Event handlers that deliver accepted events to consumers

// Public API - what other modules can use
pub use emitter::SignalEmitter;

// Internal modules
mod emitter;
