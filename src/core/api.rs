//! HTTP + WebSocket API for external renderers
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /snapshot - Latest crossing snapshot
//! - POST /trigger/{start|transit|slow} - Operator trigger
//! - WS /ws - Live snapshots; text frames sent by the client are read as
//!   operator commands

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::core::link::LinkStatus;
use crate::core::runtime::OperatorCommand;
use crate::types::{CrossingSnapshot, Phase};

/// App state
pub struct AppState {
    pub snapshots: watch::Receiver<CrossingSnapshot>,
    pub commands: mpsc::Sender<OperatorCommand>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub phase: Phase,
    pub link: Option<LinkStatus>,
    pub vision_present: bool,
    pub cycles: u64,
}

/// Trigger response
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub accepted: bool,
    pub command: String,
}

/// Create the API router
pub fn create_router(
    snapshots: watch::Receiver<CrossingSnapshot>,
    commands: mpsc::Sender<OperatorCommand>,
) -> Router {
    let state = Arc::new(AppState {
        snapshots,
        commands,
    });

    Router::new()
        .route("/health", get(health))
        .route("/snapshot", get(get_snapshot))
        .route("/trigger/:kind", post(trigger))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.snapshots.borrow();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        phase: snapshot.phase(),
        link: snapshot.link,
        vision_present: snapshot.vision_present,
        cycles: snapshot.cycle_count,
    })
}

/// Latest snapshot
async fn get_snapshot(State(state): State<Arc<AppState>>) -> Json<CrossingSnapshot> {
    Json(state.snapshots.borrow().clone())
}

/// Inject an operator trigger
async fn trigger(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<TriggerResponse>, StatusCode> {
    let command = parse_trigger(&kind).ok_or(StatusCode::NOT_FOUND)?;
    state
        .commands
        .send(command)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    info!(%command, "trigger via api");
    Ok(Json(TriggerResponse {
        accepted: true,
        command: command.to_string(),
    }))
}

/// Remote clients may trigger but never stop the crossing
fn parse_trigger(kind: &str) -> Option<OperatorCommand> {
    match kind.parse::<OperatorCommand>() {
        Ok(OperatorCommand::Shutdown) | Err(_) => None,
        Ok(command) => Some(command),
    }
}

/// WebSocket handler for live updates
async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let rx = state.snapshots.clone();
    let commands = state.commands.clone();
    ws.on_upgrade(move |socket| handle_websocket(socket, rx, commands))
}

/// Handle WebSocket connection
async fn handle_websocket(
    socket: WebSocket,
    mut rx: watch::Receiver<CrossingSnapshot>,
    commands: mpsc::Sender<OperatorCommand>,
) {
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            let json = serde_json::to_string(&*rx.borrow_and_update()).unwrap_or_default();
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => match parse_trigger(&text) {
                    Some(command) => {
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                    None => debug!(%text, "ignoring websocket message"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Run the API server
pub async fn run_server(
    addr: &str,
    snapshots: watch::Receiver<CrossingSnapshot>,
    commands: mpsc::Sender<OperatorCommand>,
) -> Result<(), Box<dyn std::error::Error>> {
    let router = create_router(snapshots, commands);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Crossing API running on {}", addr);
    println!("  GET  /health           - Health check");
    println!("  GET  /snapshot         - Latest snapshot");
    println!("  POST /trigger/:kind    - start | transit | slow");
    println!("  WS   /ws               - Live snapshots");
    axum::serve(listener, router).await?;
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
