//! Eligibility and context: who gets an answer, and what the model gets to read.

pub mod classifier;
pub mod context;
pub mod mention;
pub mod registry;

pub use classifier::ReplyClassifier;
pub use context::ThreadContextBuilder;
pub use mention::MentionMatcher;
pub use registry::OwnMessageRegistry;
