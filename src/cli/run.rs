use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, info, warn};

use super::args::{Args, Command, Toolset};
use crate::{
    core::{Config, LLMError, Orchestrator, ToolBackend},
    providers::{Message, OpenAIClient},
    server::{self, AppState, ServiceInfo},
    tools::{
        filesystem::filesystem_tools, rpc, web::web_tools, RpcToolProvider, ToolRegistry,
    },
};

/// Tool providers owned by the process for its whole lifetime.
#[derive(Default)]
pub struct ToolSet {
    pub registry: Option<Arc<ToolRegistry>>,
    rpc_providers: Vec<Arc<RpcToolProvider>>,
}

impl ToolSet {
    /// Builds the registry selected by `config`; `None` when tools are off.
    ///
    /// An RPC server that cannot be started is logged and skipped.
    pub async fn connect(config: &Config) -> Result<Self, LLMError> {
        if !config.enable_tools {
            info!("[Tools] Tool use disabled");
            return Ok(Self::default());
        }

        let mut registry = ToolRegistry::new();
        let mut rpc_providers = Vec::new();
        match config.tool_backend {
            ToolBackend::Direct => {
                registry.register(Arc::new(web_tools(config)?)).await?;
                registry
                    .register(Arc::new(filesystem_tools(&config.filesystem.root)?))
                    .await?;
            }
            ToolBackend::Rpc => {
                let root = std::env::current_dir()?;
                for server in config.resolved_rpc_servers(&root) {
                    let provider = match RpcToolProvider::connect(&server).await {
                        Ok(provider) => Arc::new(provider),
                        Err(e) => {
                            error!("[Tools] Could not start '{}': {e}", server.name);
                            continue;
                        }
                    };
                    match registry.register(provider.clone()).await {
                        Ok(_) => rpc_providers.push(provider),
                        Err(_) => provider.shutdown().await,
                    }
                }
            }
        }

        info!(
            "[Tools] {} tool(s) available: {}",
            registry.len(),
            registry.tool_names().join(", ")
        );
        Ok(Self {
            registry: Some(Arc::new(registry)),
            rpc_providers,
        })
    }

    pub async fn shutdown(&self) {
        for provider in &self.rpc_providers {
            provider.shutdown().await;
        }
    }
}

fn build_orchestrator(config: &Config, tools: &ToolSet) -> Result<Orchestrator, LLMError> {
    if config.api_key.is_none() {
        warn!("[Config] No API key configured; requests are sent without authorization");
    }
    let client = Arc::new(OpenAIClient::new(config.clone())?);
    let orchestrator =
        Orchestrator::new(client).with_system_prompt(config.system_prompt.clone());
    Ok(match &tools.registry {
        Some(registry) => orchestrator.with_registry(Arc::clone(registry)),
        None => orchestrator,
    })
}

pub async fn run(args: Args) -> Result<(), LLMError> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(enable_tools) = args.enable_tools {
        config.enable_tools = enable_tools;
    }
    if let Some(backend) = args.backend {
        config.tool_backend = backend;
    }

    debug!(
        "[SETTINGS] model: {}, tools_enabled: {}, backend: {:?}",
        config.get_model(),
        config.enable_tools,
        config.tool_backend
    );

    match args.command.unwrap_or(Command::Serve { listen: None }) {
        Command::ToolServer { toolset, root } => run_tool_server(&config, toolset, root).await,
        Command::Serve { listen } => {
            let tools = ToolSet::connect(&config).await?;
            let result = serve(&config, &tools, listen).await;
            tools.shutdown().await;
            result
        }
        Command::Ask { query } => {
            let tools = ToolSet::connect(&config).await?;
            let result = ask(&config, &tools, &query.join(" ")).await;
            tools.shutdown().await;
            result
        }
    }
}

async fn serve(config: &Config, tools: &ToolSet, listen: Option<String>) -> Result<(), LLMError> {
    let orchestrator = Arc::new(build_orchestrator(config, tools)?);
    let info = ServiceInfo {
        tools_enabled: config.enable_tools,
        backend: config.tool_backend,
        api_key_configured: config.api_key.is_some(),
        model: config.get_model().to_string(),
    };
    let listen = listen.unwrap_or_else(|| config.listen.clone());
    server::serve(&listen, AppState::new(orchestrator, info)).await
}

async fn ask(config: &Config, tools: &ToolSet, query: &str) -> Result<(), LLMError> {
    let orchestrator = build_orchestrator(config, tools)?;
    let mut stream = orchestrator.run(vec![Message::user(query)]).await?;

    let mut stdout = io::stdout();
    while let Some(fragment) = stream.next().await {
        stdout.write_all(fragment?.as_bytes())?;
        stdout.flush()?;
    }

    // Ensure final newline
    writeln!(&mut stdout)?;
    Ok(())
}

async fn run_tool_server(
    config: &Config,
    toolset: Toolset,
    root: Option<PathBuf>,
) -> Result<(), LLMError> {
    let provider = match toolset {
        Toolset::Web => web_tools(config)?,
        Toolset::Filesystem => {
            filesystem_tools(root.unwrap_or_else(|| config.filesystem.root.clone()))?
        }
    };
    rpc::serve_stdio(Arc::new(provider)).await?;
    Ok(())
}
