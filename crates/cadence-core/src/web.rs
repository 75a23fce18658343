//! Live task status over HTTP
//!
//! `/health` answers liveness probes. `/taskstatus` upgrades to a WebSocket:
//! after the client sends `get`, the current task list goes out as JSON and
//! again every few seconds whenever it changed, until the client sends
//! `stop` or disconnects.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::service::{DisplayTask, SchedulerService};

/// How often the socket re-checks the task list for changes.
const PUSH_INTERVAL: Duration = Duration::from_secs(3);

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(service: Arc<SchedulerService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/taskstatus", get(task_status))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn task_status(
    ws: WebSocketUpgrade,
    State(service): State<Arc<SchedulerService>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, service))
}

async fn handle_socket(mut socket: WebSocket, service: Arc<SchedulerService>) {
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut streaming = false;
    let mut current: Vec<DisplayTask> = Vec::new();

    loop {
        tokio::select! {
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Text(text))) if text.as_str() == "get" => {
                        streaming = true;
                        current = service.task_list().await;
                        if send_task_list(&mut socket, &current).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Text(text))) if text.as_str() == "stop" => {
                        debug!("task status stream stopped by client");
                        return;
                    }
                    Some(Ok(_)) => {}
                    // Closed or errored.
                    _ => return,
                }
            }

            _ = ticker.tick(), if streaming => {
                let list = service.task_list().await;
                if list != current {
                    current = list;
                    if send_task_list(&mut socket, &current).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn send_task_list(socket: &mut WebSocket, list: &[DisplayTask]) -> anyhow::Result<()> {
    let payload = serde_json::to_string(list)?;
    socket.send(Message::Text(payload.into())).await?;
    Ok(())
}
