use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures::future::join_all;
use futures::{stream, Stream, StreamExt};
use log::{debug, info, warn};

use crate::core::error::ToolError;
use crate::core::LLMError;
use crate::providers::llm::{BoxStream, LLMClient};
use crate::providers::{Message, MessageChunk};
use crate::tools::{ToolCall, ToolDefinition, ToolRegistry, ToolResult};

/// Outward answer: text fragments in the order they should reach the caller.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send + 'static>>;

/// Protocol states of one orchestrated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    AwaitDecision,
    ExecutingTools,
    AwaitFinal,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::AwaitDecision => "AWAIT_DECISION",
            Self::ExecutingTools => "EXECUTING_TOOLS",
            Self::AwaitFinal => "AWAIT_FINAL",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Drives one request through the tool-call protocol.
///
/// With tools available, a non-streaming decision request is sent first. If
/// the model asks for tools they run concurrently, their results are added to
/// the transcript in request order, and a single streaming request produces
/// the answer. Without tools the transcript is streamed straight away.
///
/// Only one tool round is performed per request.
pub struct Orchestrator {
    client: Arc<dyn LLMClient>,
    registry: Option<Arc<ToolRegistry>>,
    system_prompt: Option<String>,
}

impl Orchestrator {
    /// Creates a new `Orchestrator` around the given LLM client.
    ///
    /// # Arguments
    /// * `client` - The LLM client implementation to use for queries
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            registry: None,
            system_prompt: None,
        }
    }

    /// Attaches the registry whose tools are advertised to the model.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Prepended as a system message to transcripts that carry none.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn registry(&self) -> Option<&ToolRegistry> {
        self.registry.as_deref()
    }

    /// Tools advertised to the model; empty when tool use is off.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.as_ref().map(|r| r.list()).unwrap_or_default()
    }

    /// Runs the protocol for `messages` and returns the answer stream.
    ///
    /// Errors from the completion endpoint before any text is produced are
    /// returned directly; later ones arrive through the stream.
    pub async fn run(&self, messages: Vec<Message>) -> Result<TextStream, LLMError> {
        enter(Phase::Init);
        let messages = self.prepare(messages)?;
        let tools = self.tool_definitions();

        if tools.is_empty() {
            enter(Phase::AwaitFinal);
            let stream = self.client.query_streaming(&messages, None).await?;
            return Ok(forward_text(stream));
        }

        enter(Phase::AwaitDecision);
        let completion = self.client.query(&messages, Some(&tools)).await?;
        let tool_calls = match completion.message.tool_calls() {
            Some(calls) if completion.wants_tools() => calls.to_vec(),
            _ => {
                debug!(
                    "[Orchestrator] No tool use requested ({:?})",
                    completion.finish_reason
                );
                enter(Phase::Done);
                return Ok(single_shot(completion.message.content().to_string()));
            }
        };

        enter(Phase::ExecutingTools);
        let results = self.execute_tools(&tool_calls).await;

        let mut transcript = messages;
        transcript.push(completion.message);
        transcript.extend(results.into_iter().map(Message::tool));

        enter(Phase::AwaitFinal);
        let stream = self.client.query_streaming(&transcript, Some(&tools)).await?;
        Ok(forward_text(stream))
    }

    /// Executes every call concurrently; results keep the order of `calls`.
    ///
    /// Failures, including unparseable arguments and unknown tools, become
    /// error-flagged results so that sibling calls are unaffected.
    pub async fn execute_tools(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        info!("[Orchestrator] Executing {} tool call(s)", calls.len());
        join_all(calls.iter().map(|call| self.execute_tool(call))).await
    }

    async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        debug!("[Orchestrator] Tool call {}: {call}", call.id);
        let arguments = match call.parse_arguments() {
            Ok(arguments) => arguments,
            Err(e) => return ToolResult::from_error(call, &e),
        };
        let Some(registry) = &self.registry else {
            return ToolResult::from_error(call, &ToolError::ToolNotFound(call.name.clone()));
        };

        let result = match registry.execute(&call.name, arguments).await {
            Ok(output) => ToolResult::from_output(call, output),
            Err(e) => ToolResult::from_error(call, &e),
        };
        if result.is_error {
            warn!("[Orchestrator] {} -> {}", call.name, result.content);
        }
        result
    }

    fn prepare(&self, mut messages: Vec<Message>) -> Result<Vec<Message>, LLMError> {
        if messages.is_empty() {
            return Err(LLMError::EmptyInput);
        }
        if let Some(prompt) = &self.system_prompt {
            if !messages.iter().any(Message::is_system) {
                messages.insert(0, Message::system(prompt.clone()));
            }
        }
        Ok(messages)
    }
}

fn enter(phase: Phase) {
    debug!("[Orchestrator] -> {phase}");
}

/// Keeps the text of a reassembled stream; tool calls at this stage are not acted on.
fn forward_text(mut chunks: BoxStream) -> TextStream {
    Box::pin(try_stream! {
        while let Some(chunk) = chunks.next().await {
            match chunk? {
                MessageChunk::Text(text) => yield text,
                MessageChunk::ToolCalls(calls) => warn!(
                    "[Orchestrator] Ignoring {} tool call(s) in the final phase",
                    calls.len()
                ),
                MessageChunk::End(reason) => {
                    debug!("[Orchestrator] Stream finished: {reason:?}");
                    enter(Phase::Done);
                }
            }
        }
    })
}

fn single_shot(content: String) -> TextStream {
    Box::pin(stream::iter(
        (!content.is_empty()).then_some(Ok(content)),
    ))
}
