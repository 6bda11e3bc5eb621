pub mod llm;
pub mod openai;
pub mod types;

pub use llm::{BoxStream, Completion, LLMClient};
pub use openai::OpenAIClient;
pub use types::message_chunk::{FinishReason, MessageChunk};
pub use types::messages::Message;
