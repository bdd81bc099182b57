//! Tabla relacional `repos`: estado del ciclo de vida de cada repositorio.
//!
//! La fila la crea un sistema externo con estado `pending`; aquí sólo se leen
//! y actualizan el estado, el mensaje de error y la colección vectorial.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{truncate_message, AppError, MAX_ERROR_MESSAGE_CHARS};
use crate::models::{RepoStatus, Repository};

const CREATE_REPOS_TABLE: &str = "CREATE TABLE IF NOT EXISTS repos (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    repo TEXT NOT NULL,
    branch TEXT NOT NULL DEFAULT 'main',
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    qdrant_collection TEXT,
    updated_at TEXT
)";

/// Mensaje para las ingestas que quedaron a medias por una parada del servicio.
pub const INTERRUPTED_MESSAGE: &str = "ingesta interrumpida por un reinicio del servicio";

type RepoRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
);

#[async_trait]
pub trait RepoStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Repository>, AppError>;

    /// Pasa a `cloning` salvo que ya haya una ingesta en curso.
    /// Devuelve `false` si el repositorio ya estaba en `cloning`.
    async fn try_mark_cloning(&self, id: Uuid) -> Result<bool, AppError>;

    async fn mark_ready(&self, id: Uuid, collection: &str) -> Result<(), AppError>;

    /// Guarda el mensaje recortado a [`MAX_ERROR_MESSAGE_CHARS`] caracteres.
    async fn mark_error(&self, id: Uuid, message: &str) -> Result<(), AppError>;

    /// Devuelve `false` si la fila no existía.
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;
}

pub struct SqliteRepoStore {
    pool: SqlitePool,
}

impl SqliteRepoStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        store.fail_interrupted().await?;
        info!("Base de datos relacional lista en {database_url}");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::query(CREATE_REPOS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Las tareas de ingesta no sobreviven al proceso: al arrancar, cualquier
    /// fila en `cloning` es de una ingesta muerta y pasa a `error`.
    async fn fail_interrupted(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE repos SET status = 'error', error_message = ?, updated_at = ?
             WHERE status = 'cloning'",
        )
        .bind(INTERRUPTED_MESSAGE)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let interrupted = result.rows_affected();
        if interrupted > 0 {
            warn!("{interrupted} repositorios con una ingesta interrumpida pasan a 'error'.");
        }
        Ok(interrupted)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: RepoStatus,
        error_message: Option<&str>,
        collection: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE repos
             SET status = ?, error_message = ?,
                 qdrant_collection = COALESCE(?, qdrant_collection), updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(collection)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RepoStore for SqliteRepoStore {
    async fn get(&self, id: Uuid) -> Result<Option<Repository>, AppError> {
        let row: Option<RepoRow> = sqlx::query_as(
            "SELECT id, owner, repo, branch, status, error_message, qdrant_collection
             FROM repos WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_repository).transpose()
    }

    async fn try_mark_cloning(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE repos SET status = 'cloning', error_message = NULL, updated_at = ?
             WHERE id = ? AND status != 'cloning'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_ready(&self, id: Uuid, collection: &str) -> Result<(), AppError> {
        self.set_status(id, RepoStatus::Ready, None, Some(collection))
            .await
    }

    async fn mark_error(&self, id: Uuid, message: &str) -> Result<(), AppError> {
        let message = truncate_message(message, MAX_ERROR_MESSAGE_CHARS);
        self.set_status(id, RepoStatus::Error, Some(&message), None)
            .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM repos WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_repository(row: RepoRow) -> Result<Repository, AppError> {
    let (id, owner, name, branch, status, error_message, vector_collection) = row;
    let id = Uuid::parse_str(&id)
        .map_err(|e| AppError::Relational(sqlx::Error::Decode(Box::new(e))))?;
    let status = RepoStatus::from_str(&status)
        .map_err(|e| AppError::Relational(sqlx::Error::Decode(e.into())))?;

    Ok(Repository {
        id,
        owner,
        name,
        branch,
        status,
        error_message,
        vector_collection,
    })
}

#[cfg(test)]
impl SqliteRepoStore {
    pub async fn in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = Self { pool };
        store.ensure_schema().await.unwrap();
        store
    }

    pub async fn insert(&self, id: Uuid, owner: &str, repo: &str, status: RepoStatus) {
        sqlx::query("INSERT INTO repos (id, owner, repo, status) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(owner)
            .bind(repo)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .unwrap();
    }
}
