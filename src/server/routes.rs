use std::convert::Infallible;

use async_stream::stream;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::core::{LLMError, TextStream};
use crate::eventsource::Event;
use crate::providers::Message;

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    messages: Vec<Message>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/debug", get(debug_info))
        .route("/healthz", get(|| async { "ok" }))
}

async fn generate(State(state): State<AppState>, body: Bytes) -> Response {
    let request: GenerateRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("[Server] Rejecting request body: {e}");
            return error_body(StatusCode::BAD_REQUEST, None, &format!("Invalid request body: {e}"));
        }
    };

    info!("[Server] Generate with {} message(s)", request.messages.len());
    match state.orchestrator.run(request.messages).await {
        Ok(stream) => event_stream(stream),
        Err(e) => error_response(e),
    }
}

async fn debug_info(State(state): State<AppState>) -> impl IntoResponse {
    let tools = state
        .orchestrator
        .registry()
        .map(|registry| registry.tool_names())
        .unwrap_or_default();
    Json(json!({
        "toolsEnabled": state.info.tools_enabled,
        "backend": state.info.backend,
        "apiKeyConfigured": state.info.api_key_configured,
        "model": state.info.model,
        "tools": tools,
    }))
}

/// Frames each fragment as one `data:` event holding a JSON string.
fn event_stream(mut fragments: TextStream) -> Response {
    let body = stream! {
        while let Some(fragment) = fragments.next().await {
            let event = match fragment {
                Ok(text) => Event::message(json!(text).to_string()),
                Err(e) => {
                    error!("[Server] Stream failed: {e}");
                    let event = Event::message(json!({"message": e.to_string()}).to_string())
                        .with_type("error");
                    yield Ok::<_, Infallible>(Bytes::from(event.to_wire()));
                    break;
                }
            };
            yield Ok(Bytes::from(event.to_wire()));
        }
    };

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

fn error_response(err: LLMError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match err {
        LLMError::EmptyInput => error_body(status, None, &err.to_string()),
        LLMError::Upstream { body, .. } => {
            warn!("[Server] Upstream answered {status}");
            (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        err => {
            error!("[Server] Request failed: {err}");
            error_body(status, Some(err.code()), &err.to_string())
        }
    }
}

fn error_body(status: StatusCode, code: Option<&str>, message: &str) -> Response {
    let error = match code {
        Some(code) => json!({"code": code, "message": message}),
        None => json!({"message": message}),
    };
    (status, Json(json!({ "error": error }))).into_response()
}
