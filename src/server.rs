//! HTTP host for the answering pipeline.
//!
//! Three routes: the form at `/`, the JSON predict endpoint, and a
//! health probe. Inference runs on the blocking pool behind a timeout
//! so one long question cannot wedge the accept loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::SquadronError;
use crate::pipeline::{self, Answer, Answerer};

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Shared request-handling state.
#[derive(Clone)]
pub struct AppState {
    answerer: Arc<dyn Answerer>,
    model_id: String,
    timeout_secs: u64,
}

impl AppState {
    pub fn new(answerer: Arc<dyn Answerer>, model_id: String, timeout_secs: u64) -> AppState {
        AppState {
            answerer,
            model_id,
            timeout_secs,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error_reply(err: SquadronError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        SquadronError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
        SquadronError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
        SquadronError::Fetch(_) => (StatusCode::BAD_GATEWAY, "FETCH_FAILED"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INFERENCE_FAILED"),
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: code.to_string(),
        }),
    )
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "squadron",
        "model": state.model_id
    }))
}

async fn predict(
    State(state): State<AppState>,
    Json(payload): Json<PredictRequest>,
) -> Result<Json<Answer>, (StatusCode, Json<ErrorResponse>)> {
    pipeline::validate_inputs(&payload.context, &payload.question).map_err(error_reply)?;

    let answerer = Arc::clone(&state.answerer);
    let task =
        tokio::task::spawn_blocking(move || answerer.answer(&payload.context, &payload.question));
    // a timed-out worker keeps running to completion; only the response
    // stops waiting for it
    let joined = if state.timeout_secs == 0 {
        task.await
    } else {
        match tokio::time::timeout(Duration::from_secs(state.timeout_secs), task).await {
            Ok(joined) => joined,
            Err(_) => {
                error!("inference exceeded {}s", state.timeout_secs);
                return Err(error_reply(SquadronError::Timeout(state.timeout_secs)));
            }
        }
    };
    match joined {
        Ok(Ok(answer)) => {
            info!("answered with {:?} (score {:.4})", answer.answer, answer.score);
            Ok(Json(answer))
        }
        Ok(Err(e)) => {
            error!("failed to answer: {}", e);
            Err(error_reply(e))
        }
        Err(e) => {
            error!("inference worker died: {}", e);
            Err(error_reply(SquadronError::inference(
                "inference worker died",
            )))
        }
    }
}

/// Build the application router around one answerer.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/api/predict", post(predict))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(cfg: &AppConfig, answerer: Arc<dyn Answerer>) -> Result<(), SquadronError> {
    let state = AppState::new(answerer, cfg.model_id.clone(), cfg.timeout_secs);
    let app = router(state);
    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{}", addr);
    if cfg.share {
        info!("share mode on, the form is reachable from other machines");
    }
    axum::serve(listener, app).await?;
    Ok(())
}
