//! Cliente de embeddings con reintentos ante límites de peticiones.
//!
//! Cada fichero se embebe en una única petición (todos sus trozos más el texto
//! del registro completo). Si el proveedor responde con un límite de
//! peticiones se espera `2^(intento+1)` segundos antes de reintentar, hasta un
//! máximo de [`MAX_EMBED_ATTEMPTS`] intentos en total.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::AppError;

/// Número total de intentos (el primero incluido).
pub const MAX_EMBED_ATTEMPTS: u32 = 5;

/// Error devuelto por un proveedor de embeddings.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("rate limit: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Provider(String),
}

/// Proveedor de embeddings: un vector por texto, en el mismo orden.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Espera previa al intento `attempt + 1` (base 0): 2, 4, 8, 16... segundos.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64 << attempt)
}

/// Embebe `texts` reintentando sólo cuando el proveedor limita peticiones.
///
/// Cualquier otro error aborta sin reintentar. Agotar los intentos produce
/// [`AppError::RateLimited`], que la ingesta trata como fallo terminal.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>, AppError> {
    let expected = texts.len();

    for attempt in 0..MAX_EMBED_ATTEMPTS {
        match embedder.embed(texts.clone()).await {
            Ok(vectors) if vectors.len() == expected => return Ok(vectors),
            Ok(vectors) => {
                return Err(AppError::Embedding(format!(
                    "Número de embeddings ({}) distinto al número de textos ({expected})",
                    vectors.len()
                )));
            }
            Err(EmbedError::RateLimited(msg)) => {
                if attempt + 1 == MAX_EMBED_ATTEMPTS {
                    error!("Máximo de reintentos alcanzado para embeddings: {msg}");
                    break;
                }
                let wait = backoff_delay(attempt);
                warn!(
                    "Límite de peticiones alcanzado. Reintentando en {}s... (intento {}/{})",
                    wait.as_secs(),
                    attempt + 1,
                    MAX_EMBED_ATTEMPTS
                );
                tokio::time::sleep(wait).await;
            }
            Err(EmbedError::Provider(msg)) => {
                error!("Error inesperado generando embeddings: {msg}");
                return Err(AppError::Embedding(msg));
            }
        }
    }

    Err(AppError::RateLimited {
        attempts: MAX_EMBED_ATTEMPTS,
    })
}
