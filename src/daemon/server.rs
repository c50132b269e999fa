//! HTTP surface of the daemon
//!
//! - `GET /health`  -- [`HealthReport`] as JSON
//! - `POST /mcp`    -- one JSON-RPC message per request. An `initialize`
//!   without an `mcp-session-id` header opens a connection and the id is
//!   returned in that header; every later request must carry it.
//! - `DELETE /mcp`  -- close the connection named by the header

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use crate::daemon::manager::{HealthReport, SessionManager};
use crate::daemon::protocol::{
    client_name_from_initialize, handle_request, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    INTERNAL_ERROR, INVALID_REQUEST, METHOD_INITIALIZE, PARSE_ERROR, UNKNOWN_CONNECTION,
};
use crate::daemon::transport::http::HttpConnectionTransport;
use crate::error::Result;

/// Header carrying the connection id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Application state shared across handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

/// Build the daemon's router.
pub fn router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mcp", post(handle_post).delete(handle_delete))
        .with_state(AppState { manager })
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, manager: Arc<SessionManager>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, router(manager))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.manager.health())
}

fn rpc_error(status: StatusCode, id: Value, code: i64, message: impl Into<String>) -> Response {
    (
        status,
        Json(JsonRpcResponse::failure(id, JsonRpcError::new(code, message))),
    )
        .into_response()
}

fn connection_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {}", e),
            )
        }
    };
    let request_id = request.id.clone().unwrap_or(Value::Null);

    let connection_id = match connection_header(&headers) {
        Some(id) => id,
        None if request.method == METHOD_INITIALIZE => {
            let id = Uuid::new_v4().to_string();
            let client = client_name_from_initialize(request.params.as_ref());
            let transport = Arc::new(HttpConnectionTransport::new(id.clone(), client));
            if let Err(e) = state.manager.register(id.clone(), transport) {
                return rpc_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    request_id,
                    INTERNAL_ERROR,
                    e.to_string(),
                );
            }
            id
        }
        None => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                request_id,
                INVALID_REQUEST,
                format!("missing {} header", SESSION_HEADER),
            )
        }
    };

    if state.manager.touch(&connection_id).is_err() {
        return rpc_error(
            StatusCode::NOT_FOUND,
            request_id,
            UNKNOWN_CONNECTION,
            format!("unknown connection: {}", connection_id),
        );
    }

    let header = [(SESSION_HEADER, connection_id.clone())];
    match handle_request(&state.manager, &connection_id, request).await {
        Some(response) => (header, Json(response)).into_response(),
        None => (StatusCode::ACCEPTED, header).into_response(),
    }
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let Some(id) = connection_header(&headers) else {
        return StatusCode::BAD_REQUEST;
    };
    if state.manager.cleanup(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
