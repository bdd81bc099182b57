use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    error::AppError,
    ingest,
    purge::{self, DeletionReport},
    rag,
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct AnalyzePayload {
    repo_id: Uuid,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    repo_id: Uuid,
    status: &'static str,
    message: String,
}

#[derive(Deserialize)]
pub struct AskPayload {
    repo_id: Uuid,
    question: String,
    #[serde(default = "default_stream")]
    stream: bool,
}

fn default_stream() -> bool {
    true
}

#[derive(Deserialize)]
pub struct DeletePayload {
    repo_id: Uuid,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    success: bool,
    message: String,
    deleted_from: DeletionReport,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/analyze", post(analyze_handler))
        .route("/ask", post(ask_handler))
        .route("/delete", delete(delete_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn analyze_handler(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzePayload>,
) -> Result<impl IntoResponse, AppError> {
    let repo_id = payload.repo_id;
    let services = &state.services;

    if services.repos.get(repo_id).await?.is_none() {
        return Err(AppError::NotFound(repo_id));
    }
    if !services.repos.try_mark_cloning(repo_id).await? {
        return Err(AppError::AlreadyRunning(repo_id));
    }

    info!("Ingesta del repositorio {repo_id} encolada.");
    ingest::spawn_supervised(services.clone(), state.config.embedding_dim, repo_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeResponse {
            repo_id,
            status: "queued",
            message: "Ingesta iniciada en segundo plano.".to_string(),
        }),
    ))
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Response, AppError> {
    let retrieval = &state.config.retrieval;

    if !payload.stream {
        let answer = rag::ask(&state.services, retrieval, payload.repo_id, &payload.question).await?;
        return Ok(Json(answer).into_response());
    }

    let events = rag::ask_stream(&state.services, retrieval, payload.repo_id, &payload.question).await?;
    let lines = events.map(|event| {
        let mut line = serde_json::to_string(&event).unwrap_or_else(|e| {
            error!("No se pudo serializar el evento: {e}");
            json!({ "type": "error", "data": e.to_string() }).to_string()
        });
        line.push('\n');
        Ok::<_, Infallible>(line)
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

#[axum::debug_handler]
async fn delete_handler(
    State(state): State<AppState>,
    Json(payload): Json<DeletePayload>,
) -> Json<DeleteResponse> {
    let report = purge::delete_repository(&state.services, payload.repo_id).await;
    let message = match (&report.relational_error, report.success()) {
        (_, true) => format!("Repositorio {} eliminado.", payload.repo_id),
        (Some(err), false) => format!(
            "No se pudo borrar el repositorio {} de la base de datos: {err}",
            payload.repo_id
        ),
        (None, false) => format!(
            "No se encontró el repositorio {} en la base de datos.",
            payload.repo_id
        ),
    };

    Json(DeleteResponse {
        success: report.success(),
        message,
        deleted_from: report,
    })
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Response {
    match state.services.graph.ping().await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => {
            error!("Error en el health check de Neo4j: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
