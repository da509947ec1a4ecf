//! Prompt text: the model's system instructions and the user-facing response catalog.

pub mod system;
pub mod text;

pub use system::SystemPrompt;
pub use text::ResponseCatalog;
