//! HTTP surface of the relay.

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use log::info;
use serde::Serialize;

use crate::core::{LLMError, Orchestrator, ToolBackend};

/// What `/api/debug` reports about the running service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub tools_enabled: bool,
    pub backend: ToolBackend,
    pub api_key_configured: bool,
    pub model: String,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub info: Arc<ServiceInfo>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, info: ServiceInfo) -> Self {
        Self {
            orchestrator,
            info: Arc::new(info),
        }
    }
}

pub fn router(state: AppState) -> Router {
    routes::routes().with_state(state)
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn serve(addr: &str, state: AppState) -> Result<(), LLMError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local: SocketAddr = listener.local_addr()?;
    info!("[Server] Listening on http://{local}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("[Server] Shutting down");
        })
        .await?;
    Ok(())
}
