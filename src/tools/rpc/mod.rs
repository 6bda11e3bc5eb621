//! Out-of-process tool providers.
//!
//! A tool server is any program that speaks line-delimited JSON-RPC 2.0 on its
//! stdin/stdout with the `initialize`, `tools/list` and `tools/call` methods.
//! [`RpcToolProvider`] is the client side; [`serve`] turns any in-process
//! [`ToolProvider`](crate::tools::ToolProvider) into such a server.

pub mod client;
pub mod server;
pub mod types;

pub use client::RpcToolProvider;
pub use server::{serve, serve_stdio};
