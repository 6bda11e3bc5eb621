use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::core::ToolBackend;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file to read instead of ./config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable tool usage
    #[arg(long, global = true)]
    pub enable_tools: Option<bool>,

    /// Where tools run
    #[arg(long, value_enum, global = true)]
    pub backend: Option<ToolBackend>,

    /// Enable debug output
    #[arg(short, long, global = true, default_value = "false")]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API (the default)
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:3000
        #[arg(long)]
        listen: Option<String>,
    },
    /// Ask one question and stream the answer to stdout
    Ask {
        /// Your query to the LLM
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Serve a tool set over JSON-RPC on stdin/stdout
    ToolServer {
        #[arg(long, value_enum)]
        toolset: Toolset,

        /// Base directory for the filesystem tools
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Toolset {
    Web,
    Filesystem,
}
