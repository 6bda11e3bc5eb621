pub mod cli;
pub mod core;
pub mod eventsource;
pub mod providers;
pub mod server;
pub mod tools;

pub use crate::core::{Config, LLMError, Orchestrator, ToolError};
pub use providers::{LLMClient, Message, OpenAIClient};
pub use tools::{LocalToolProvider, RpcToolProvider, ToolProvider, ToolRegistry};
