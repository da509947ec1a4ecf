//! Language-model backends.

pub mod model;
pub mod openai;
pub mod providers;

pub use model::{ChatMessage, LanguageModel, ModelOutput, ToolSpec};
pub use openai::OpenAiCompatibleModel;
pub use providers::Provider;
