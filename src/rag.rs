//! Consulta Graph-RAG sobre un repositorio ya ingerido.
//!
//! Flujo:
//!   1. Comprobar que el repositorio está en estado `ready`.
//!   2. Embeber la pregunta y buscar los top-K puntos en su colección Qdrant.
//!   3. Expandir en Neo4j desde los ficheros recuperados (saltos y filas acotados).
//!   4. Construir el prompt (fragmentos agrupados por fichero + relaciones).
//!   5. Generar la respuesta como flujo de eventos: sources → content… → done | error.

use std::collections::HashSet;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    app_state::Services,
    config::RetrievalConfig,
    embedding::embed_with_retry,
    error::AppError,
    graph::format_relations,
    models::{GraphRelation, RepoStatus},
    vector_store::{RecordType, RetrievedPoint},
};

/// Número de ficheros que se anuncian en el evento `sources`.
pub const SOURCES_LIMIT: usize = 5;

/// Evento del flujo de respuesta (una línea NDJSON por evento).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum AskEvent {
    Sources(Vec<String>),
    Content(String),
    Done,
    Error(String),
}

/// Respuesta completa (modo sin streaming).
#[derive(Debug, Clone, Serialize)]
pub struct AskAnswer {
    pub answer: String,
    pub sources: Vec<String>,
}

/// Contexto recuperado y prompt listo para el modelo.
struct PreparedQuestion {
    sources: Vec<String>,
    prompt: String,
}

async fn prepare(
    services: &Services,
    retrieval: &RetrievalConfig,
    repo_id: Uuid,
    question: &str,
) -> Result<PreparedQuestion, AppError> {
    // 1) Precondición: sin esto no se toca ningún almacén
    let repo = services
        .repos
        .get(repo_id)
        .await?
        .ok_or(AppError::NotFound(repo_id))?;
    if repo.status != RepoStatus::Ready {
        return Err(AppError::NotReady(repo_id, repo.status));
    }
    let collection = repo
        .vector_collection
        .clone()
        .unwrap_or_else(|| repo.collection_name());

    // 2) Búsqueda vectorial
    let question_vector = embed_with_retry(services.embedder.as_ref(), vec![question.to_string()])
        .await?
        .pop()
        .unwrap_or_default();
    let hits = services
        .vectors
        .search(&collection, question_vector, retrieval.top_k)
        .await?;

    // 3) Expansión en el grafo desde los ficheros recuperados
    let files = distinct_files(&hits);
    let relations = services
        .graph
        .expand(repo_id, &files, retrieval.graph_hops, retrieval.graph_limit)
        .await?;

    info!(
        "Consulta sobre {repo_id}: {} fragmentos de {} ficheros (mejor similitud {:.3}), {} relaciones del grafo.",
        hits.len(),
        files.len(),
        hits.first().map(|h| h.score).unwrap_or(0.0),
        relations.len()
    );

    Ok(PreparedQuestion {
        prompt: build_prompt(question, &hits, &relations),
        sources: files.into_iter().take(SOURCES_LIMIT).collect(),
    })
}

/// Rutas de fichero en orden de aparición (= similitud descendente), sin repetir.
fn distinct_files(hits: &[RetrievedPoint]) -> Vec<String> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|h| seen.insert(h.payload.file_path.clone()))
        .map(|h| h.payload.file_path.clone())
        .collect()
}

/// Prompt con los fragmentos agrupados por fichero, las relaciones del grafo,
/// la pregunta y las instrucciones de formato.
fn build_prompt(question: &str, hits: &[RetrievedPoint], relations: &[GraphRelation]) -> String {
    let mut prompt = String::from("Contexto del repositorio:\n");

    for file in distinct_files(hits) {
        prompt.push_str(&format!("\n### {file}\n"));
        for hit in hits.iter().filter(|h| h.payload.file_path == file) {
            let line = hit.payload.line_start.unwrap_or(1);
            let kind = match hit.payload.record_type {
                RecordType::Chunk => "fragmento",
                RecordType::FullFile => "inicio del fichero",
            };
            prompt.push_str(&format!(
                "[{file}:{line}] ({kind})\n{}\n",
                hit.payload.content
            ));
        }
    }

    if !relations.is_empty() {
        prompt.push_str("\nRelaciones del grafo estructural:\n");
        prompt.push_str(&format_relations(relations));
        prompt.push('\n');
    }

    prompt.push_str(&format!("\nPregunta:\n{question}\n"));
    prompt.push_str(
        "\nResponde de forma concisa usando sólo el contexto anterior y cita cada afirmación con referencias ruta:línea.",
    );
    prompt
}

enum Stage {
    Sources(Vec<String>, BoxStream<'static, Result<String, AppError>>),
    Generating(BoxStream<'static, Result<String, AppError>>),
    Finished,
}

/// Prepara la consulta y devuelve el flujo de eventos de la respuesta.
///
/// Los errores de precondición (`NotFound`, `NotReady`) y de recuperación se
/// devuelven antes de emitir nada. Un fallo durante la generación se convierte
/// en un único evento `error` que cierra el flujo.
pub async fn ask_stream(
    services: &Services,
    retrieval: &RetrievalConfig,
    repo_id: Uuid,
    question: &str,
) -> Result<BoxStream<'static, AskEvent>, AppError> {
    let prepared = prepare(services, retrieval, repo_id, question).await?;
    let generation = services.generator.generate(prepared.prompt);

    Ok(events(prepared.sources, generation))
}

fn events(
    sources: Vec<String>,
    generation: BoxStream<'static, Result<String, AppError>>,
) -> BoxStream<'static, AskEvent> {
    stream::unfold(Stage::Sources(sources, generation), |stage| async move {
        match stage {
            Stage::Sources(sources, generation) => {
                Some((AskEvent::Sources(sources), Stage::Generating(generation)))
            }
            Stage::Generating(mut generation) => match generation.next().await {
                Some(Ok(fragment)) => Some((AskEvent::Content(fragment), Stage::Generating(generation))),
                Some(Err(err)) => {
                    warn!("Generación interrumpida: {err}");
                    Some((AskEvent::Error(err.to_string()), Stage::Finished))
                }
                None => Some((AskEvent::Done, Stage::Finished)),
            },
            Stage::Finished => None,
        }
    })
    .boxed()
}

/// Variante sin streaming: concatena todos los fragmentos generados.
pub async fn ask(
    services: &Services,
    retrieval: &RetrievalConfig,
    repo_id: Uuid,
    question: &str,
) -> Result<AskAnswer, AppError> {
    let prepared = prepare(services, retrieval, repo_id, question).await?;
    let answer = services
        .generator
        .generate(prepared.prompt)
        .try_fold(String::new(), |mut acc, fragment| async move {
            acc.push_str(&fragment);
            Ok(acc)
        })
        .await?;

    Ok(AskAnswer {
        answer,
        sources: prepared.sources,
    })
}
