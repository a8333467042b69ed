//! HTTP surface for the presentation layer.
//!
//! This module provides an HTTP server that:
//! - Exposes the latest engagement snapshot and the live interventions
//! - Accepts player, material and notes actions
//! - Accepts dismissals and quiz/other intervention requests
//!
//! Handlers only read the agent's watch channels and forward commands; the
//! agent loop stays the single owner of all state.

use crate::agent::{AgentGone, AgentHandle, Command};
use crate::core::{Category, EngagementSnapshot, Intervention, PlayerEvent, UserAction};
use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub session: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayerActionRequest {
    pub event: PlayerEvent,
}

#[derive(Debug, Deserialize)]
pub struct NotesRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct InterventionRequest {
    pub category: Category,
    #[serde(default)]
    pub message: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn agent_gone(e: AgentGone) -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: e.to_string(),
            code: "AGENT_STOPPED".to_string(),
        }),
    )
}

async fn forward(agent: &AgentHandle, command: Command) -> Result<StatusCode, ApiError> {
    agent.send(command).await.map_err(agent_gone)?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /health
async fn health(State(agent): State<AgentHandle>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session: agent.session_state().to_string(),
    })
}

/// GET /snapshot
async fn snapshot(State(agent): State<AgentHandle>) -> Json<EngagementSnapshot> {
    Json(agent.snapshot())
}

/// GET /interventions
async fn interventions(State(agent): State<AgentHandle>) -> Json<Vec<Intervention>> {
    Json(agent.interventions())
}

/// DELETE /interventions/:id
async fn dismiss(
    State(agent): State<AgentHandle>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    forward(&agent, Command::Dismiss(id)).await
}

/// POST /interventions
async fn request_intervention(
    State(agent): State<AgentHandle>,
    Json(request): Json<InterventionRequest>,
) -> Result<StatusCode, ApiError> {
    forward(
        &agent,
        Command::RequestIntervention {
            category: request.category,
            message: request.message,
        },
    )
    .await
}

/// POST /actions/player
async fn player_action(
    State(agent): State<AgentHandle>,
    Json(request): Json<PlayerActionRequest>,
) -> Result<StatusCode, ApiError> {
    forward(
        &agent,
        Command::Action(UserAction::Player {
            event: request.event,
        }),
    )
    .await
}

/// POST /actions/material
async fn material_click(State(agent): State<AgentHandle>) -> Result<StatusCode, ApiError> {
    forward(&agent, Command::Action(UserAction::MaterialClick)).await
}

/// PUT /actions/notes
async fn notes(
    State(agent): State<AgentHandle>,
    Json(request): Json<NotesRequest>,
) -> Result<StatusCode, ApiError> {
    forward(
        &agent,
        Command::Action(UserAction::NotesChanged { text: request.text }),
    )
    .await
}

/// POST /actions/reset
async fn reset_counters(State(agent): State<AgentHandle>) -> Result<StatusCode, ApiError> {
    forward(&agent, Command::ResetCounters).await
}

/// Build the router without binding a socket.
pub fn router(agent: AgentHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/snapshot", get(snapshot))
        .route(
            "/interventions",
            get(interventions).post(request_intervention),
        )
        .route("/interventions/:id", delete(dismiss))
        .route("/actions/player", post(player_action))
        .route("/actions/material", post(material_click))
        .route("/actions/notes", put(notes))
        .route("/actions/reset", post(reset_counters))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://localhost:3000"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(agent)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    agent: AgentHandle,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(agent);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Engagement agent server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
