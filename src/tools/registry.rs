use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::ToolError;

use super::types::{ToolDefinition, ToolOutput, ToolProvider};

struct Route {
    provider: Arc<dyn ToolProvider>,
    definition: ToolDefinition,
}

/// Merges the tools of several providers into one name-addressed set.
///
/// Registration happens at startup through `&mut self`; afterwards the
/// registry is shared behind an `Arc` and only read, so lookups need no lock.
///
/// When two providers declare the same tool name the later registration
/// shadows the earlier one (last write wins). The shadowed name keeps its
/// original position in [`ToolRegistry::list`].
#[derive(Default)]
pub struct ToolRegistry {
    routes: HashMap<String, Route>,
    order: Vec<String>,
    providers: Vec<Arc<dyn ToolProvider>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every tool the provider declares and returns how many it added.
    ///
    /// A provider whose listing fails contributes nothing; the error is
    /// returned and the registry stays usable with the other providers.
    pub async fn register(&mut self, provider: Arc<dyn ToolProvider>) -> Result<usize, ToolError> {
        let definitions = provider.list_tools().await.map_err(|e| {
            warn!("[Registry] Provider '{}' failed to list tools: {e}", provider.name());
            e
        })?;

        let count = definitions.len();
        for definition in definitions {
            let name = definition.name.clone();
            let route = Route {
                provider: Arc::clone(&provider),
                definition,
            };
            match self.routes.insert(name.clone(), route) {
                Some(previous) => info!(
                    "[Registry] Tool '{name}' from '{}' shadows the one from '{}'",
                    provider.name(),
                    previous.provider.name()
                ),
                None => self.order.push(name),
            }
        }

        info!(
            "[Registry] Registered {count} tools from '{}'",
            provider.name()
        );
        self.providers.push(provider);
        Ok(count)
    }

    /// The merged tool set, in first-registration order.
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.routes.get(name))
            .map(|route| route.definition.clone())
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Name of the provider currently owning `tool`.
    pub fn owner_of(&self, tool: &str) -> Option<&str> {
        self.routes.get(tool).map(|route| route.provider.name())
    }

    /// Runs `name` on its owning provider.
    ///
    /// Only a missing tool is an `Err`; any failure inside the provider comes
    /// back as an error-flagged [`ToolOutput`] so a batch never aborts.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let route = self
            .routes
            .get(name)
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))?;

        debug!(
            "[Registry] Executing '{name}' on '{}'",
            route.provider.name()
        );

        match route.provider.call_tool(name, arguments).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!("[Registry] Tool '{name}' failed: {e}");
                Ok(ToolOutput::error(format!("Error: {e}")))
            }
        }
    }

    /// Registered providers, for lifecycle management by the owner.
    pub fn providers(&self) -> &[Arc<dyn ToolProvider>] {
        &self.providers
    }
}
