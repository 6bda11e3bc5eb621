use super::message::{FinishReason, ResponseMessage};
use super::shared::Usage;
use serde::Deserialize;

/// Body of a non-streaming chat completion.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
}
