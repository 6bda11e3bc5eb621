use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use super::types::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, ListToolsParams, ListToolsResult, PROTOCOL_VERSION,
};
use crate::core::{RpcServerConfig, ToolError};
use crate::tools::{ToolDefinition, ToolOutput, ToolProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Tool provider living in a child process, reached over its stdin/stdout
///
/// One JSON-RPC message per line. Responses are matched to requests by id, so
/// several calls may be in flight at once.
pub struct RpcToolProvider {
    name: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    next_id: AtomicU64,
    pending: Pending,
    request_timeout: Duration,
}

impl RpcToolProvider {
    /// Spawns the configured command and performs the initialize handshake.
    pub async fn connect(config: &RpcServerConfig) -> Result<Self, ToolError> {
        info!(
            "[RPC] Starting '{}': {} {}",
            config.name,
            config.command,
            config.args.join(" ")
        );

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            ToolError::Transport(format!("failed to spawn '{}': {e}", config.command))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Transport("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Transport("child stdout unavailable".to_string()))?;

        let provider = Self {
            name: config.name.clone(),
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_timeout: config
                .request_timeout_secs
                .map_or(REQUEST_TIMEOUT, Duration::from_secs),
        };
        provider.spawn_reader(stdout);

        match provider.initialize().await {
            Ok(server) => {
                info!(
                    "[RPC] '{}' connected to {} {}",
                    provider.name, server.name, server.version
                );
                Ok(provider)
            }
            Err(e) => {
                provider.shutdown().await;
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> Result<Implementation, ToolError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(serde_json::Map::new()),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let result: InitializeResult = self.request("initialize", &params).await?;
        self.write(&JsonRpcRequest::notification("notifications/initialized"))
            .await?;
        Ok(result.server_info)
    }

    /// Closes stdin and terminates the child.
    pub async fn shutdown(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
            debug!("[RPC] '{}' stopped", self.name);
        }
        self.pending.lock().await.clear();
    }

    async fn request<P, R>(&self, method: &str, params: &P) -> Result<R, ToolError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let params = serde_json::to_value(params)
            .map_err(|e| ToolError::InvalidArgument(format!("unserializable params: {e}")))?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self
            .write(&JsonRpcRequest::new(id, method, Some(params)))
            .await
        {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(ToolError::Transport(format!(
                    "'{}' closed the connection",
                    self.name
                )))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!("[RPC] '{}' did not answer {method} in time", self.name);
                return Err(ToolError::Timeout(format!("{}: {method}", self.name)));
            }
        };

        if let Some(error) = response.error {
            return Err(ToolError::ExecutionError(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| ToolError::Transport(format!("invalid {method} result: {e}")))
    }

    async fn write(&self, message: &JsonRpcRequest) -> Result<(), ToolError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| ToolError::InvalidArgument(e.to_string()))?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| ToolError::Transport(format!("'{}' is shut down", self.name)))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn spawn_reader(&self, stdout: ChildStdout) {
        let pending = Arc::clone(&self.pending);
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("[RPC] '{name}' sent an unreadable line ({e}): {line}");
                        continue;
                    }
                };
                let Some(id) = response.id.as_u64() else {
                    warn!("[RPC] '{name}' sent a response without a numeric id");
                    continue;
                };
                match pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => warn!("[RPC] '{name}' answered unknown request {id}"),
                }
            }
            // Fail whatever is still waiting.
            pending.lock().await.clear();
            debug!("[RPC] '{name}' output closed");
        });
    }
}

#[async_trait]
impl ToolProvider for RpcToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        let mut tools = Vec::new();
        let mut params = ListToolsParams::default();
        loop {
            let page: ListToolsResult = self.request("tools/list", &params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(cursor) if params.cursor.as_ref() == Some(&cursor) => {
                    warn!("[RPC] '{}' repeated cursor {cursor}, stopping", self.name);
                    break;
                }
                Some(cursor) => params.cursor = Some(cursor),
                None => break,
            }
        }
        debug!("[RPC] '{}' lists {} tools", self.name, tools.len());
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let result: CallToolResult = self.request("tools/call", &params).await?;
        let content = result.joined_text();
        Ok(if result.is_error {
            ToolOutput::error(content)
        } else {
            ToolOutput::text(content)
        })
    }
}
