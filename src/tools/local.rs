use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::error::ToolError;

use super::types::{Tool, ToolDefinition, ToolOutput, ToolProvider};

/// In-process function table exposing [`Tool`]s through the provider interface
pub struct LocalToolProvider {
    name: String,
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
}

impl LocalToolProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let def = tool.definition();
        if !self.tools.contains_key(&def.name) {
            self.order.push(def.name.clone());
        }
        self.tools.insert(def.name, Box::new(tool));
    }

    #[must_use]
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition())
            .collect()
    }

    pub fn get_tool(&self, name: &str) -> Option<&dyn Tool> {
        Some(self.tools.get(name)?.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolProvider for LocalToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(self.get_tool_definitions())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let tool = self
            .get_tool(name)
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))?;
        tool.execute(&arguments).await.map(ToolOutput::text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "Echoes its input".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(&self, arguments: &Value) -> Result<String, ToolError> {
            Ok(arguments.to_string())
        }
    }

    #[tokio::test]
    async fn test_call_registered_tool() {
        let provider = LocalToolProvider::new("local").with_tool(Echo);
        let output = provider.call_tool("echo", json!({"a": 1})).await.unwrap();
        assert_eq!(output, ToolOutput::text(r#"{"a":1}"#));
        assert_eq!(provider.list_tools().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let provider = LocalToolProvider::new("local");
        assert!(matches!(
            provider.call_tool("nope", json!({})).await,
            Err(ToolError::ToolNotFound(_))
        ));
    }
}
