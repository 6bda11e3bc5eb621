pub mod filesystem;
pub mod local;
pub mod registry;
pub mod rpc;
pub mod types;
pub mod web;

pub use local::LocalToolProvider;
pub use registry::ToolRegistry;
pub use rpc::RpcToolProvider;
pub use types::{Tool, ToolCall, ToolDefinition, ToolOutput, ToolProvider, ToolResult};
