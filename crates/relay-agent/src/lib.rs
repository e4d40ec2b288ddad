pub mod openai;
pub mod pipeline;
pub mod prompt;
pub mod provider;

pub use openai::OpenAiProvider;
pub use pipeline::Responder;
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role};
