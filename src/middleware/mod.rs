// Middleware pipeline
//
// Stages that every published event passes through, in order, before any
// handler sees it.

// Public API - what other modules can use
pub use chain::{Middleware, MiddlewareChain, Rejection, StageRejection};
pub use debounce::DebounceMiddleware;
pub use enrichment::EnrichmentMiddleware;
pub use filter::FilterMiddleware;
pub use logging::LoggingMiddleware;
pub use rate_limit::RateLimitMiddleware;

// Internal modules
mod chain;
mod debounce;
mod enrichment;
mod filter;
mod logging;
mod rate_limit;
