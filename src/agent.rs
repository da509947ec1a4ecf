//! Answering pipeline: rate limiting, the search loop and the per-event responder.

pub mod rate_limit;
pub mod responder;
pub mod search_loop;

pub use rate_limit::RateLimiter;
pub use responder::{Outcome, Responder, ResponderDeps, ResponderSettings};
pub use search_loop::{SearchLoop, SearchSettings};
