use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::backend::{BackendClient, BackendError};
use crate::config::ConciergeConfig;
use crate::fallback;
use crate::supervisor::{ScriptStatus, StopOutcome, Supervisor, SupervisorError};

const SCRIPT_PENDING_OUTPUT: &str = "Script started. Output will be updated as it becomes available.";

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub backend: BackendClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Info,
    Error,
}

/// `{status, message}` body returned by every action route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub status: ActionStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ActionResponse {
    fn new(status: ActionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            output: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::new(ActionStatus::Error, message)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(rename = "autoRestart", default)]
    auto_restart: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/script/run", post(run_script))
        .route("/api/script/stop", post(stop_script))
        .route("/api/script/status", get(script_status))
        .route("/api/script/download", get(download_script))
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/processor/start", post(start_processor))
        .route("/api/processor/stop", post(stop_processor))
        .route("/api/processor/status", get(processor_status))
        .route("/api/work-orders", get(work_orders))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn run(config: &ConciergeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let backend = BackendClient::new(&config.backend)?;
    let supervisor = Arc::new(Supervisor::new(&config.script));
    let state = AppState {
        supervisor: Arc::clone(&supervisor),
        backend,
    };

    let app = router(state);

    let addr = format!("{}:{}", config.serve.bind, config.serve.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("concierge listening on {local_addr}");
    tracing::info!(backend = %config.backend.base_url, "forwarding to email processor");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The script runs in its own process group, so it does not see our Ctrl-C.
    match supervisor.stop().await {
        Ok(StopOutcome::Stopped { pid }) => {
            tracing::info!(pid, "stopped companion script on shutdown")
        }
        Ok(StopOutcome::NotRunning) => {}
        Err(e) => tracing::warn!("failed to stop companion script on shutdown: {e}"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested");
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({"ok": true}))
}

// --- Companion script ---

async fn run_script(State(state): State<AppState>, body: Bytes) -> Json<ActionResponse> {
    // A running script wins over a bad body; start() re-checks under the lock.
    if state.supervisor.is_running().await {
        return Json(ActionResponse::error(
            SupervisorError::AlreadyRunning.to_string(),
        ));
    }

    let request: RunRequest = if body.is_empty() {
        RunRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return Json(ActionResponse::error(format!("Failed to run script: {e}")));
            }
        }
    };

    match state.supervisor.start(request.auto_restart).await {
        Ok(_) => Json(ActionResponse {
            output: Some(SCRIPT_PENDING_OUTPUT.to_string()),
            ..ActionResponse::new(ActionStatus::Success, "Script started successfully")
        }),
        Err(e @ SupervisorError::AlreadyRunning) => Json(ActionResponse::error(e.to_string())),
        Err(e) => {
            tracing::error!("error running script: {e}");
            Json(ActionResponse::error(format!("Failed to run script: {e}")))
        }
    }
}

async fn stop_script(State(state): State<AppState>) -> Json<ActionResponse> {
    match state.supervisor.stop().await {
        Ok(StopOutcome::Stopped { .. }) => Json(ActionResponse::new(
            ActionStatus::Success,
            "Script stopped successfully",
        )),
        Ok(StopOutcome::NotRunning) => Json(ActionResponse::new(
            ActionStatus::Info,
            "No script is currently running.",
        )),
        Err(e) => {
            tracing::error!("error stopping script: {e}");
            Json(ActionResponse::error(format!("Failed to stop script: {e}")))
        }
    }
}

async fn script_status(State(state): State<AppState>) -> Json<ScriptStatus> {
    Json(state.supervisor.status().await)
}

async fn download_script(State(state): State<AppState>) -> Response {
    match state.supervisor.script_source().await {
        Ok(Some(contents)) => {
            let disposition = format!(
                "attachment; filename={}",
                state.supervisor.script_dir().script_name()
            );
            (
                [
                    (header::CONTENT_TYPE, "text/plain".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                contents,
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ActionResponse::error("Script file not found")),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("error reading script source: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ActionResponse::error(format!(
                    "Failed to download script: {e}"
                ))),
            )
                .into_response()
        }
    }
}

// --- Email processor passthrough ---

/// Pass a backend answer through, or turn the failure into an error action.
fn forward(result: Result<Value, BackendError>, failure: &str) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) if e.is_unreachable() => {
            tracing::warn!("{failure}: {e}");
            Json(ActionResponse::error(fallback::BACKEND_UNREACHABLE)).into_response()
        }
        Err(e) => {
            tracing::warn!("{failure}: {e}");
            Json(ActionResponse::error(format!("{failure}: {e}"))).into_response()
        }
    }
}

async fn get_config(State(state): State<AppState>) -> Json<Value> {
    match state.backend.get_json("/config").await {
        Ok(value) => Json(value),
        Err(e) => {
            tracing::warn!("using default configuration: {e}");
            Json(fallback::default_config())
        }
    }
}

async fn update_config(State(state): State<AppState>, body: Bytes) -> Response {
    const FAILURE: &str = "Failed to update configuration";
    let body: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return Json(ActionResponse::error(format!("{FAILURE}: {e}"))).into_response(),
    };
    forward(state.backend.post_json("/config", Some(&body)).await, FAILURE)
}

async fn start_processor(State(state): State<AppState>) -> Response {
    forward(
        state.backend.post_json("/start-processor", None).await,
        "Failed to start the email processor",
    )
}

async fn stop_processor(State(state): State<AppState>) -> Response {
    forward(
        state.backend.post_json("/stop-processor", None).await,
        "Failed to stop the email processor",
    )
}

async fn processor_status(State(state): State<AppState>) -> Json<Value> {
    match state.backend.get_json("/processor-status").await {
        Ok(value) => Json(value),
        Err(e) if e.is_unreachable() => {
            tracing::warn!("processor status unavailable: {e}");
            Json(fallback::offline_processor_status(fallback::BACKEND_UNREACHABLE))
        }
        Err(e) => {
            tracing::warn!("processor status unavailable: {e}");
            Json(fallback::offline_processor_status(&format!(
                "Failed to connect to the email processor service: {e}"
            )))
        }
    }
}

async fn work_orders(State(state): State<AppState>) -> Json<Value> {
    match state.backend.get_json("/work-orders").await {
        Ok(value) => Json(value),
        Err(e) => {
            tracing::warn!("serving sample work orders: {e}");
            Json(fallback::sample_work_orders())
        }
    }
}
