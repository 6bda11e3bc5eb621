use crate::tools::ToolCall;

/// One unit of a reassembled completion stream.
///
/// Text is yielded as soon as it arrives; tool calls are only yielded once,
/// fully accumulated, when the upstream stream ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageChunk {
    /// A chunk containing text content
    Text(String),
    /// Every tool call requested in this turn, in request order
    ToolCalls(Vec<ToolCall>),
    /// Stream end marker with the completion reason
    End(FinishReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// The model finished generating content
    Stop,
    /// The model wants tools executed
    ToolCalls,
    /// Generation hit the token limit
    Length,
    /// Generation was cut by a content filter
    ContentFilter,
    /// The upstream reported a reason this client does not know
    Other(String),
}

impl MessageChunk {
    /// Create a new end chunk with a stop reason
    pub const fn stop() -> Self {
        Self::End(FinishReason::Stop)
    }
}
