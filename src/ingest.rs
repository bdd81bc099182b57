//! Ingesta de un repositorio: clonado superficial, troceado y embeddings en
//! Qdrant, y estructura sintáctica (File → Function/Class) en Neo4j.
//!
//! Las llamadas (CALLS) se fusionan en una segunda pasada, cuando ya existen
//! las declaraciones de todos los ficheros, para que el grafo resultante no
//! dependa del orden de recorrido.
//!
//! Máquina de estados sobre `repos.status`:
//! `pending/queued → cloning → ready`, o `cloning → error` ante cualquier
//! fallo no recuperable. El directorio de trabajo es temporal y se elimina al
//! terminar, tanto si la ingesta acaba bien como si no.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

use crate::{
    app_state::Services,
    chunker::{chunk_content, full_file_text},
    embedding::embed_with_retry,
    error::AppError,
    extractor::extract_structure,
    languages::{detect_language, is_supported},
    models::{CodeFact, FileGraph, FileNode, Repository},
    vector_store::file_points,
};

/// Directorios de dependencias, compilación, VCS y cachés que no se recorren.
pub const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    "vendor",
    ".next",
    ".idea",
    ".vscode",
    ".cache",
    "coverage",
    ".mypy_cache",
    ".pytest_cache",
    ".tox",
];

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub points_written: usize,
    pub declarations: usize,
    pub calls: usize,
    pub parse_failures: u32,
}

/// Implementa cómo se mostrará el resumen como texto.
impl fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos. {} puntos vectoriales, {} declaraciones y {} llamadas ({} ficheros sin parsear).",
            self.files_scanned,
            self.files_ingested,
            self.files_skipped,
            self.points_written,
            self.declarations,
            self.calls,
            self.parse_failures
        )
    }
}

/// Lo que aporta un fichero ingerido al resumen, más sus llamadas pendientes.
struct FileStats {
    points: usize,
    declarations: usize,
    callees: Vec<String>,
    parse_failed: bool,
}

/// Ficheros con extensión soportada, podando los directorios excluidos durante
/// el recorrido. El orden es estable (por nombre) para que los logs sean
/// reproducibles.
pub fn collect_source_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported(e.path()))
        .map(DirEntry::into_path)
        .collect()
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

/// Ruta relativa con separadores `/`, que es la identidad del fichero en
/// ambos almacenes.
fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Ingiere el repositorio completo. Cualquier error no recuperable queda
/// persistido en `repos.error_message` (recortado) antes de devolverse.
pub async fn ingest_repository(
    services: &Services,
    embedding_dim: u64,
    repo_id: Uuid,
) -> Result<IngestionSummary, AppError> {
    match run_ingestion(services, embedding_dim, repo_id).await {
        Ok(summary) => {
            info!("✅ Repositorio {repo_id} listo. {summary}");
            Ok(summary)
        }
        Err(err) => {
            error!("Ingesta del repositorio {repo_id} fallida: {err}");
            if let Err(mark_err) = services.repos.mark_error(repo_id, &err.to_string()).await {
                error!("No se pudo registrar el error del repositorio {repo_id}: {mark_err}");
            }
            Err(err)
        }
    }
}

async fn run_ingestion(
    services: &Services,
    embedding_dim: u64,
    repo_id: Uuid,
) -> Result<IngestionSummary, AppError> {
    let repo = services
        .repos
        .get(repo_id)
        .await?
        .ok_or(AppError::NotFound(repo_id))?;
    let collection = repo.collection_name();

    services
        .vectors
        .recreate_collection(&collection, embedding_dim)
        .await?;

    // Se borra al salir de esta función, con éxito o con error.
    let workspace = tempfile::Builder::new()
        .prefix("repo-graph-rag-")
        .tempdir()?;
    services.cloner.clone_repo(&repo, workspace.path()).await?;

    let files = collect_source_files(workspace.path());
    let total = files.len();
    info!(
        "{} ficheros candidatos en {}/{} (rama {})",
        total, repo.owner, repo.name, repo.branch
    );

    let mut summary = IngestionSummary::default();
    let mut pending_calls: Vec<(String, Vec<String>)> = Vec::new();
    for (index, path) in files.iter().enumerate() {
        summary.files_scanned += 1;
        let rel_path = relative_path(workspace.path(), path);
        info!("[{}/{}] Procesando: {}", index + 1, total, rel_path);

        match ingest_file(services, &repo, &collection, path, &rel_path).await? {
            Some(stats) => {
                summary.files_ingested += 1;
                summary.points_written += stats.points;
                summary.declarations += stats.declarations;
                summary.calls += stats.callees.len();
                if stats.parse_failed {
                    summary.parse_failures += 1;
                }
                if !stats.callees.is_empty() {
                    pending_calls.push((rel_path, stats.callees));
                }
            }
            None => summary.files_skipped += 1,
        }
    }

    // Segunda pasada: todas las declaraciones ya están en el grafo
    for (rel_path, callees) in &pending_calls {
        services.graph.merge_calls(repo.id, rel_path, callees).await?;
    }

    services.repos.mark_ready(repo_id, &collection).await?;
    Ok(summary)
}

/// Chunker → embeddings → Qdrant → extractor → Neo4j para un fichero.
/// Devuelve `None` si el fichero está vacío.
async fn ingest_file(
    services: &Services,
    repo: &Repository,
    collection: &str,
    path: &Path,
    rel_path: &str,
) -> Result<Option<FileStats>, AppError> {
    let Some(lang) = detect_language(path) else {
        return Ok(None);
    };

    let bytes = tokio::fs::read(path).await?;
    let content = String::from_utf8_lossy(&bytes);
    if content.trim().is_empty() {
        warn!("Fichero vacío, se omite: {rel_path}");
        return Ok(None);
    }

    // --- Fase 1: vectores (todos los trozos + registro completo en una petición) ---
    let chunks = chunk_content(&content);
    let full_text = full_file_text(&content);
    debug!(
        "{rel_path}: {} trozos, el último empieza en el carácter {}",
        chunks.len(),
        chunks.last().map_or(0, |c| c.start_char)
    );
    let mut texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    texts.push(full_text.to_string());

    let vectors = embed_with_retry(services.embedder.as_ref(), texts).await?;
    let points = file_points(repo.id, rel_path, &chunks, full_text, vectors)?;
    let points_count = points.len();
    services.vectors.upsert(collection, points).await?;

    // --- Fase 2: estructura ---
    let (facts, parse_failed) = match extract_structure(lang, rel_path, &content) {
        Ok(facts) => (facts, false),
        Err(err) => {
            warn!("{err}. Se registra el fichero sin declaraciones.");
            (Vec::new(), true)
        }
    };

    let (declarations, callees) = split_facts(facts);
    let file_graph = FileGraph {
        file: FileNode {
            path: rel_path.to_string(),
            language: lang.id().to_string(),
            lines: content.lines().count() as i64,
        },
        facts: declarations,
    };
    services.graph.merge_file(repo.id, &file_graph).await?;

    Ok(Some(FileStats {
        points: points_count,
        declarations: file_graph.facts.len(),
        callees,
        parse_failed,
    }))
}

/// Separa las declaraciones (se fusionan ya) de los nombres llamados (se
/// fusionan al final de la ingesta).
fn split_facts(facts: Vec<CodeFact>) -> (Vec<CodeFact>, Vec<String>) {
    let mut declarations = Vec::new();
    let mut callees = Vec::new();
    for fact in facts {
        match fact {
            CodeFact::Call { callee } => callees.push(callee),
            declaration => declarations.push(declaration),
        }
    }
    (declarations, callees)
}

/// Lanza la ingesta en segundo plano bajo un supervisor: si la tarea interna
/// entra en pánico o se cancela, el fallo también queda registrado en `repos`.
pub fn spawn_supervised(services: Services, embedding_dim: u64, repo_id: Uuid) -> JoinHandle<()> {
    tokio::spawn(async move {
        let worker_services = services.clone();
        let worker = tokio::spawn(async move {
            ingest_repository(&worker_services, embedding_dim, repo_id).await
        });

        match worker.await {
            Ok(Ok(_)) => {}
            // Ya persistido por `ingest_repository`
            Ok(Err(_)) => {}
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    "la tarea de ingesta terminó con un pánico"
                } else {
                    "la tarea de ingesta fue cancelada"
                };
                error!("Repositorio {repo_id}: {reason}");
                if let Err(e) = services.repos.mark_error(repo_id, reason).await {
                    error!("No se pudo registrar el error del repositorio {repo_id}: {e}");
                }
            }
        }
    })
}
