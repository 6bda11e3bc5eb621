use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::types::{
    CallToolParams, CallToolResult, Implementation, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION,
};
use crate::core::ToolError;
use crate::tools::ToolProvider;

/// Serves `provider` on this process's stdin/stdout until stdin closes.
pub async fn serve_stdio(provider: Arc<dyn ToolProvider>) -> Result<(), ToolError> {
    serve(
        provider,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Answers line-delimited JSON-RPC requests read from `input`.
///
/// Requests are handled concurrently; responses are written as they complete.
pub async fn serve<R, W>(
    provider: Arc<dyn ToolProvider>,
    input: R,
    mut output: W,
) -> Result<(), ToolError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!("[RPC] Serving '{}'", provider.name());
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let mut line = match serde_json::to_string(&response) {
                Ok(line) => line,
                Err(e) => {
                    warn!("[RPC] Dropping unserializable response: {e}");
                    continue;
                }
            };
            line.push('\n');
            output.write_all(line.as_bytes()).await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("[RPC] Unparseable request: {e}");
                let _ = tx.send(JsonRpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
                continue;
            }
        };

        let Some(id) = request.id.clone() else {
            debug!("[RPC] Notification: {}", request.method);
            continue;
        };

        let provider = Arc::clone(&provider);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = handle(provider.as_ref(), id, request).await;
            let _ = tx.send(response);
        });
    }

    drop(tx);
    writer
        .await
        .map_err(|e| ToolError::Transport(e.to_string()))??;
    info!("[RPC] Input closed, stopping");
    Ok(())
}

async fn handle(provider: &dyn ToolProvider, id: Value, request: JsonRpcRequest) -> JsonRpcResponse {
    debug!("[RPC] {} (id {id})", request.method);
    match request.method.as_str() {
        "initialize" => {
            let result = InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: json!({"tools": {}}),
                server_info: Implementation {
                    name: provider.name().to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            };
            respond(id, &result)
        }
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => match provider.list_tools().await {
            Ok(tools) => respond(
                id,
                &ListToolsResult {
                    tools,
                    next_cursor: None,
                },
            ),
            Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
        },
        "tools/call" => {
            let params: CallToolParams =
                match serde_json::from_value(request.params.unwrap_or(Value::Null)) {
                    Ok(params) => params,
                    Err(e) => {
                        return JsonRpcResponse::failure(
                            id,
                            INVALID_PARAMS,
                            format!("Invalid params: {e}"),
                        )
                    }
                };
            let arguments = params.arguments.unwrap_or_else(|| json!({}));
            let result = match provider.call_tool(&params.name, arguments).await {
                Ok(output) => CallToolResult::text(output.content, output.is_error),
                Err(e) => {
                    warn!("[RPC] {} failed: {e}", params.name);
                    CallToolResult::text(format!("Error: {e}"), true)
                }
            };
            respond(id, &result)
        }
        method => JsonRpcResponse::failure(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        ),
    }
}

fn respond<T: serde::Serialize>(id: Value, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
    }
}
