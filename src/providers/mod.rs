pub mod gemini;
pub mod traits;
pub mod types;

pub use traits::AiProvider;
pub use types::{ChatMessage, ChatRequest, ProviderError, Role, StreamEvent};
