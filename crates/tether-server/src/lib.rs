//! # tether-server
//!
//! HTTP operator surface for the Tether relay:
//!
//! - `POST /api/v1/chat` enqueues a message and waits for its turn
//! - `GET /api/v1/status` shows queue depth, lease holder, and the pending patch
//! - `/api/v1/patches` lists proposals and is the only place they are approved

pub mod context;
pub mod error;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tether_autonomy::PatchProposal;
use tether_config::schema::ServerConfig;
use tether_core::{RequestId, RequestOrigin, TetherError, ToolOutcome};
use tether_runtime::{RuntimeHandle, RuntimeStatus};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

pub use context::HttpContext;
pub use error::ApiError;

/// Shared server state.
pub struct AppState {
    pub config: ServerConfig,
    pub handle: RuntimeHandle,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    request_id: RequestId,
    replies: Vec<String>,
    documents: Vec<PathBuf>,
    outcomes: Vec<ToolOutcome>,
    memories_stored: usize,
    degraded: bool,
    follow_ups: u8,
}

#[derive(Serialize)]
struct PatchesResponse {
    targets: Vec<String>,
    pending: Option<PatchProposal>,
    history: Vec<PatchProposal>,
}

/// Build the Axum router.
pub fn build_router(config: ServerConfig, handle: RuntimeHandle) -> Router {
    let state = Arc::new(AppState {
        config: config.clone(),
        handle,
    });

    let api_routes = Router::new()
        .route("/api/v1/chat", post(chat_handler))
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/patches", get(patches_handler))
        .route("/api/v1/patches/{id}/deploy", post(deploy_handler))
        .route("/api/v1/patches/{id}/drop", post(drop_handler));

    let api_routes = if config.api_key.is_some() {
        api_routes.layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
    } else {
        api_routes
    };

    Router::new()
        .route("/health", get(health_handler))
        .merge(api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(ref expected_key) = state.config.api_key {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match provided {
            Some(key) if key == expected_key => {}
            _ => {
                warn!("unauthorized API request, invalid or missing API key");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
    }
    Ok(next.run(request).await)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.handle.status().await;
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: status.uptime_secs,
    })
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<RuntimeStatus> {
    Json(state.handle.status().await)
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(TetherError::Parse("message is empty".into()).into());
    }

    // Only reachable past the auth middleware when a key is configured.
    let privileged = state.config.api_key.is_some();
    let context = Arc::new(HttpContext::new(privileged));
    let handle = state
        .handle
        .submit(context.clone(), RequestOrigin::inbound("http"), req.message)?;
    let request_id = handle.request_id();
    info!(%request_id, privileged, "chat request enqueued");

    let report = handle.wait().await?;
    Ok(Json(ChatResponse {
        request_id,
        replies: context.replies(),
        documents: context.documents(),
        outcomes: report.outcomes,
        memories_stored: report.memories_stored,
        degraded: report.degraded,
        follow_ups: report.follow_ups,
    }))
}

async fn patches_handler(State(state): State<Arc<AppState>>) -> Json<PatchesResponse> {
    let patches = state.handle.patches();
    Json(PatchesResponse {
        targets: patches.targets(),
        pending: patches.pending().await,
        history: patches.history().await,
    })
}

async fn deploy_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PatchProposal>, ApiError> {
    info!(patch_id = %id, "operator approved patch");
    Ok(Json(state.handle.patches().deploy(id).await?))
}

async fn drop_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PatchProposal>, ApiError> {
    info!(patch_id = %id, "operator dropped patch");
    Ok(Json(state.handle.patches().drop(id).await?))
}

/// Serve until `cancel` fires.
pub async fn start_server(
    config: ServerConfig,
    handle: RuntimeHandle,
    cancel: CancellationToken,
) -> tether_core::Result<()> {
    let listen = config.listen.clone();
    let router = build_router(config, handle);

    info!(listen = %listen, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| TetherError::Config(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
