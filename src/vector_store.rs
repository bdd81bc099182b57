//! Índice vectorial por repositorio sobre Qdrant.
//!
//! API pública:
//!   - `VectorIndex` (trait inyectado en ingesta y consulta)
//!   - `QdrantIndex::connect_from_config(&AppConfig)`
//!   - `file_points(...)` para construir los puntos de un fichero.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, DeleteCollectionBuilder, Distance, PointStruct, ScoredPoint,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::chunker::{chunk_point_id, full_file_point_id, TextChunk};
use crate::config::AppConfig;
use crate::error::AppError;

/// Granularidad del registro guardado en el payload (`type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Chunk,
    FullFile,
}

/// Punto listo para upsert.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// Payload de cada punto. `chunk_index` y `line_start` sólo existen en trozos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub content: String,
    pub file_path: String,
    pub repo_id: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u64>,
}

/// Resultado de una búsqueda por similitud.
#[derive(Debug, Clone)]
pub struct RetrievedPoint {
    pub score: f32,
    pub payload: PointPayload,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Borra (si existe) y crea de cero la colección con distancia coseno.
    async fn recreate_collection(&self, collection: &str, dimension: u64) -> Result<(), AppError>;

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<(), AppError>;

    /// Top-K puntos ordenados por similitud descendente.
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> Result<Vec<RetrievedPoint>, AppError>;

    /// Devuelve `false` si la colección no existía.
    async fn delete_collection(&self, collection: &str) -> Result<bool, AppError>;
}

/// Construye los puntos de un fichero: uno por trozo más el registro completo.
///
/// `vectors` trae primero los vectores de los trozos y al final el del texto
/// completo, en el mismo orden en que se embebieron.
pub fn file_points(
    repo_id: Uuid,
    rel_path: &str,
    chunks: &[TextChunk],
    full_text: &str,
    mut vectors: Vec<Vec<f32>>,
) -> Result<Vec<VectorPoint>, AppError> {
    if vectors.len() != chunks.len() + 1 {
        return Err(AppError::Embedding(format!(
            "Se esperaban {} vectores para {rel_path} y llegaron {}",
            chunks.len() + 1,
            vectors.len()
        )));
    }

    let full_vector = vectors.pop().unwrap_or_default();
    let repo_id = repo_id.to_string();

    let mut points: Vec<VectorPoint> = chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| VectorPoint {
            id: chunk_point_id(rel_path, chunk.index),
            vector,
            payload: PointPayload {
                content: chunk.text.clone(),
                file_path: rel_path.to_string(),
                repo_id: repo_id.clone(),
                record_type: RecordType::Chunk,
                chunk_index: Some(chunk.index as u64),
                line_start: Some(chunk.line_start as u64),
            },
        })
        .collect();

    points.push(VectorPoint {
        id: full_file_point_id(rel_path),
        vector: full_vector,
        payload: PointPayload {
            content: full_text.to_string(),
            file_path: rel_path.to_string(),
            repo_id,
            record_type: RecordType::FullFile,
            chunk_index: None,
            line_start: Some(1),
        },
    });

    Ok(points)
}

/// Cliente Qdrant compartido por todo el proceso.
#[derive(Clone)]
pub struct QdrantIndex {
    client: Qdrant,
}

impl QdrantIndex {
    pub fn connect_from_config(cfg: &AppConfig) -> Result<Self, AppError> {
        let mut builder = Qdrant::from_url(&cfg.qdrant_url);
        if let Some(key) = &cfg.qdrant_api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder.build()?;
        info!("Cliente Qdrant configurado para {}", cfg.qdrant_url);
        Ok(Self { client })
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn recreate_collection(&self, collection: &str, dimension: u64) -> Result<(), AppError> {
        if self.client.collection_exists(collection).await? {
            self.client
                .delete_collection(DeleteCollectionBuilder::new(collection))
                .await?;
            info!("Colección '{collection}' eliminada para reconstruirla.");
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine)),
            )
            .await?;
        info!("Colección '{collection}' creada (dim={dimension}, coseno).");
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<(), AppError> {
        if points.is_empty() {
            return Ok(());
        }

        let mut structs = Vec::with_capacity(points.len());
        for point in points {
            let payload: HashMap<String, qdrant_client::qdrant::Value> =
                serde_json::from_value(json!(point.payload))?;
            structs.push(PointStruct::new(point.id, point.vector, payload));
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, structs).wait(true))
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> Result<Vec<RetrievedPoint>, AppError> {
        let response = self
            .client
            .search_points(SearchPointsBuilder::new(collection, vector, top_k).with_payload(true))
            .await?;

        Ok(response
            .result
            .iter()
            .filter_map(RetrievedPoint::from_scored_point)
            .collect())
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool, AppError> {
        if !self.client.collection_exists(collection).await? {
            return Ok(false);
        }
        self.client
            .delete_collection(DeleteCollectionBuilder::new(collection))
            .await?;
        Ok(true)
    }
}

impl RetrievedPoint {
    fn from_scored_point(point: &ScoredPoint) -> Option<Self> {
        let p = &point.payload;
        let get_str = |key: &str| {
            p.get(key)
                .and_then(qdrant_client::qdrant::Value::as_str)
                .cloned()
        };
        let get_int = |key: &str| {
            p.get(key)
                .and_then(qdrant_client::qdrant::Value::as_integer)
                .and_then(|v| u64::try_from(v).ok())
        };

        let record_type = match get_str("type")?.as_str() {
            "full_file" => RecordType::FullFile,
            _ => RecordType::Chunk,
        };

        Some(Self {
            score: point.score,
            payload: PointPayload {
                content: get_str("content")?,
                file_path: get_str("file_path")?,
                repo_id: get_str("repo_id").unwrap_or_default(),
                record_type,
                chunk_index: get_int("chunk_index"),
                line_start: get_int("line_start"),
            },
        })
    }
}
