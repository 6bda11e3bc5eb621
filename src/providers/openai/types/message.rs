use std::borrow::Cow;

use crate::providers::types::message_chunk::FinishReason as LLMFinishReason;
use crate::providers::types::messages::Message as LLMMessage;
use crate::tools::ToolCall;
use crate::tools::ToolDefinition as LLMToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Assistant message as returned by a non-streaming completion.
#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub refusal: Option<String>,
}

impl From<ResponseMessage> for LLMMessage {
    fn from(message: ResponseMessage) -> Self {
        let tool_calls = message.tool_calls.filter(|calls| !calls.is_empty());
        Self::assistant(message.content.unwrap_or_default(), tool_calls)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Tool<'a> {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    #[serde(borrow)]
    pub function: Function<'a>,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

impl<'a> From<&'a LLMToolDefinition> for Tool<'a> {
    fn from(tool_definition: &'a LLMToolDefinition) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: Function {
                name: tool_definition.name.as_str(),
                description: Some(tool_definition.description.as_str()),
                parameters: Cow::Borrowed(&tool_definition.parameters),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Function<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub parameters: Cow<'a, Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    FunctionCall,
    #[serde(other)]
    Unknown,
}

impl From<FinishReason> for LLMFinishReason {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop => Self::Stop,
            FinishReason::Length => Self::Length,
            FinishReason::ContentFilter => Self::ContentFilter,
            FinishReason::ToolCalls | FinishReason::FunctionCall => Self::ToolCalls,
            FinishReason::Unknown => Self::Other("unknown".to_string()),
        }
    }
}
