use std::fmt::Display;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::ToolError;

/// A tool invocation requested by the model
///
/// Serialized in the completion endpoint's function-calling shape:
/// `{"id", "type": "function", "function": {"name", "arguments"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireToolCall", into = "WireToolCall")]
pub struct ToolCall {
    /// Unique identifier for the tool call
    pub id: String,
    /// Name of the tool being called
    pub name: String,
    /// Raw argument text; valid JSON only once the call is complete
    pub arguments: String,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<WireToolCall> for ToolCall {
    fn from(wire: WireToolCall) -> Self {
        Self::new(wire.id, wire.function.name, wire.function.arguments)
    }
}

impl From<ToolCall> for WireToolCall {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            call_type: function_type(),
            function: WireFunction {
                name: call.name,
                arguments: call.arguments,
            },
        }
    }
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parses the accumulated argument text. Empty text means "no arguments".
    pub fn parse_arguments(&self) -> Result<Value, ToolError> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
            .map_err(|e| ToolError::ArgumentParse(format!("{}: {e}", self.name)))
    }
}

impl Display for ToolCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.arguments)
    }
}

/// Defines a tool's interface including its name, description, and parameter schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name of the tool, unique across a registry
    pub name: String,
    /// Description of what the tool does
    #[serde(default)]
    pub description: String,
    /// JSON schema defining the tool's parameters
    #[serde(rename = "inputSchema")]
    pub parameters: Value,
}

/// What a provider hands back for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// The outcome of one tool call, correlated with the request that caused it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn from_output(call: &ToolCall, output: ToolOutput) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content: output.content,
            is_error: output.is_error,
        }
    }

    /// Error-flagged result carrying the error text as content.
    pub fn from_error(call: &ToolCall, error: &ToolError) -> Self {
        Self::from_output(call, ToolOutput::error(format!("Error: {error}")))
    }
}

/// Trait implemented by every in-process tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition including its name, description, and parameter schema
    fn definition(&self) -> ToolDefinition;

    /// Executes the tool with the provided arguments
    ///
    /// # Arguments
    /// * `arguments` - JSON value containing the tool's arguments
    ///
    /// # Returns
    /// * `Result<String, ToolError>` - text result or error
    async fn execute(&self, arguments: &Value) -> Result<String, ToolError>;
}

/// A backend able to list and execute a set of named tools.
///
/// Implemented in-process by [`LocalToolProvider`](super::LocalToolProvider)
/// and out-of-process by [`RpcToolProvider`](super::rpc::RpcToolProvider).
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError>;
}

/// Reads an optional positive integer argument.
pub(crate) fn usize_arg(arguments: &Value, key: &str) -> Option<usize> {
    arguments[key]
        .as_u64()
        .or_else(|| arguments[key].as_f64().map(|f| f as u64))
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
}

/// Reads a required string argument.
pub(crate) fn str_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArgument(format!("'{key}' must be a string")))
}
