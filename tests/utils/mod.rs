pub mod builders;
pub mod mocks;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use builders::{event, events_from};
#[allow(unused_imports)]
pub use mocks::{RecordingHandler, RecordingMiddleware};
