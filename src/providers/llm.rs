use crate::core::LLMError;
use crate::providers::{FinishReason, Message};
use crate::tools::ToolDefinition;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use super::MessageChunk;

pub type BoxStream = Pin<Box<dyn Stream<Item = Result<MessageChunk, LLMError>> + Send + 'static>>;

/// A fully received, non-streaming answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// The assistant message, including any requested tool calls
    pub message: Message,
    pub finish_reason: FinishReason,
}

impl Completion {
    pub const fn wants_tools(&self) -> bool {
        matches!(self.finish_reason, FinishReason::ToolCalls)
    }
}

#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Query the LLM with a list of messages and optional tools
    async fn query(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<Completion, LLMError>;

    /// Query the LLM with streaming response and optional tools
    async fn query_streaming(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<BoxStream, LLMError>;
}
