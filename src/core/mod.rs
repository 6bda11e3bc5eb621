pub mod config;
pub mod conversation;
pub mod error;

pub use config::{Config, RpcServerConfig, ToolBackend};
pub use conversation::{Orchestrator, Phase, TextStream};
pub use error::{LLMError, ToolError};
