// State-tracking primitives shared by sources
//
// Each source owns its own instances; none of these are global services.

// Public API - what other modules can use
pub use coalescer::{CoalescingTimer, SettleFn, TimerState};
pub use differential::{ActivityKey, DifferentialTracker, Transition};
pub use magnitude::{MagnitudeGuard, Reading};

// Internal modules
mod coalescer;
mod differential;
mod magnitude;
