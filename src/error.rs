//! Errores del núcleo de ingesta y recuperación.
//!
//! Las variantes siguen la política de propagación del sistema: los fallos por
//! fichero (parseo) se registran y se ignoran, los fallos de ejecución abortan
//! la ingesta y acaban persistidos en el estado del repositorio.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::models::RepoStatus;

/// Longitud máxima del mensaje de error guardado en la tabla `repos`.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// El proveedor de embeddings sigue limitando tras agotar los reintentos.
    #[error("límite de peticiones del proveedor de embeddings agotado tras {attempts} intentos")]
    RateLimited { attempts: u32 },

    #[error("error del proveedor de embeddings: {0}")]
    Embedding(String),

    #[error("no se pudo parsear {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("fallo al clonar el repositorio: {0}")]
    Clone(String),

    #[error("error en el índice vectorial: {0}")]
    VectorStore(String),

    #[error("error en el grafo: {0}")]
    GraphStore(String),

    #[error("error en la base de datos relacional: {0}")]
    Relational(#[from] sqlx::Error),

    /// Pregunta lanzada antes de que la ingesta termine.
    #[error("el repositorio {0} no está listo (estado: {1})")]
    NotReady(Uuid, RepoStatus),

    #[error("repositorio no encontrado: {0}")]
    NotFound(Uuid),

    #[error("ya hay una ingesta en curso para el repositorio {0}")]
    AlreadyRunning(Uuid),

    #[error("error generando la respuesta: {0}")]
    Generation(String),

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

impl From<neo4rs::Error> for AppError {
    fn from(err: neo4rs::Error) -> Self {
        Self::GraphStore(err.to_string())
    }
}

impl From<qdrant_client::QdrantError> for AppError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Self::VectorStore(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::VectorStore(format!("payload inválido: {err}"))
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotReady(..) => StatusCode::PRECONDITION_FAILED,
            Self::AlreadyRunning(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Error atendiendo la petición: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Recorta un mensaje a `max_chars` caracteres sin partir código UTF-8.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}
