//! Escritura y lectura del grafo estructural (File → Function/Class).
//!
//! Todas las escrituras usan MERGE con claves que incluyen `repo_id`, de modo
//! que reingerir el mismo contenido no duplica nodos ni relaciones y dos
//! repositorios nunca se enlazan entre sí.

use std::sync::Arc;

use async_trait::async_trait;
use neo4rs::{query, Graph, Query, Txn};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CodeFact, DeclKind, FileGraph, GraphRelation};

const MERGE_FILE: &str = "MERGE (f:File {path: $path, repo_id: $repo_id})
     SET f.language = $language, f.lines = $lines";

const MERGE_CALL: &str = "MATCH (f:File {path: $path, repo_id: $repo_id})
     MERGE (called:Function {name: $name, repo_id: $repo_id})
     MERGE (f)-[:CALLS]->(called)";

const DELETE_REPO: &str = "MATCH (n)
     WHERE n.repo_id = $repo_id
     DETACH DELETE n
     RETURN count(n) AS deleted";

fn merge_declaration(kind: DeclKind) -> String {
    format!(
        "MATCH (f:File {{path: $path, repo_id: $repo_id}})
         MERGE (d:{label} {{name: $name, file_path: $path, repo_id: $repo_id}})
         SET d.kind = $kind, d.line = $line
         MERGE (f)-[:CONTAINS]->(d)",
        label = kind.label()
    )
}

fn expansion_query(hops: u32) -> String {
    format!(
        "MATCH (f:File)-[*0..{hops}]-(related)
         WHERE f.path IN $files AND f.repo_id = $repo_id AND related.repo_id = $repo_id
         RETURN f.path AS path, labels(related) AS labels, related.name AS name
         LIMIT $limit"
    )
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Fusiona el nodo del fichero y todos sus hechos en una única transacción.
    async fn merge_file(&self, repo_id: Uuid, file: &FileGraph) -> Result<(), AppError>;

    /// Fusiona las relaciones CALLS de un fichero ya fusionado, en una transacción.
    async fn merge_calls(
        &self,
        repo_id: Uuid,
        path: &str,
        callees: &[String],
    ) -> Result<(), AppError>;

    /// Vecindario de los ficheros dados, hasta `hops` saltos y `limit` filas.
    async fn expand(
        &self,
        repo_id: Uuid,
        files: &[String],
        hops: u32,
        limit: usize,
    ) -> Result<Vec<GraphRelation>, AppError>;

    /// Borra todos los nodos del repositorio. Devuelve cuántos se borraron.
    async fn delete_repo(&self, repo_id: Uuid) -> Result<u64, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

/// Implementación sobre Neo4j (una conexión compartida por el proceso).
#[derive(Clone)]
pub struct Neo4jGraph {
    graph: Arc<Graph>,
}

impl Neo4jGraph {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    async fn merge_file(&self, repo_id: Uuid, file: &FileGraph) -> Result<(), AppError> {
        let tx = self.graph.start_txn().await?;
        upsert_file_graph(&tx, repo_id, file).await?;
        tx.commit().await?;
        debug!(
            "Estructura de {} fusionada ({} hechos).",
            file.file.path,
            file.facts.len()
        );
        Ok(())
    }

    async fn merge_calls(
        &self,
        repo_id: Uuid,
        path: &str,
        callees: &[String],
    ) -> Result<(), AppError> {
        if callees.is_empty() {
            return Ok(());
        }

        let repo_id = repo_id.to_string();
        let tx = self.graph.start_txn().await?;
        for callee in callees {
            tx.run(call_query(path, &repo_id, callee)).await?;
        }
        tx.commit().await?;
        debug!("{} llamadas de {path} fusionadas.", callees.len());
        Ok(())
    }

    async fn expand(
        &self,
        repo_id: Uuid,
        files: &[String],
        hops: u32,
        limit: usize,
    ) -> Result<Vec<GraphRelation>, AppError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut cursor = self
            .graph
            .execute(
                query(&expansion_query(hops))
                    .param("files", files.to_vec())
                    .param("repo_id", repo_id.to_string())
                    .param("limit", i64::try_from(limit).unwrap_or(i64::MAX)),
            )
            .await?;

        let mut relations = Vec::new();
        while let Some(row) = cursor.next().await? {
            let Some(path) = row.get::<String>("path") else {
                continue;
            };
            let labels: Vec<String> = row.get("labels").unwrap_or_default();
            relations.push(GraphRelation {
                path,
                label: labels.join(":"),
                name: row.get::<String>("name"),
            });
        }
        Ok(relations)
    }

    async fn delete_repo(&self, repo_id: Uuid) -> Result<u64, AppError> {
        let mut cursor = self
            .graph
            .execute(query(DELETE_REPO).param("repo_id", repo_id.to_string()))
            .await?;

        let deleted = match cursor.next().await? {
            Some(row) => row.get::<i64>("deleted").unwrap_or(0),
            None => 0,
        };
        info!("Eliminados {deleted} nodos de Neo4j para el repositorio {repo_id}");
        Ok(u64::try_from(deleted).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }
}

/// Persiste el fichero y sus hechos dentro de la transacción abierta.
async fn upsert_file_graph(tx: &Txn, repo_id: Uuid, file: &FileGraph) -> Result<(), AppError> {
    let repo_id = repo_id.to_string();
    let path = file.file.path.clone();

    // 1) File
    tx.run(
        query(MERGE_FILE)
            .param("path", path.clone())
            .param("repo_id", repo_id.clone())
            .param("language", file.file.language.clone())
            .param("lines", file.file.lines),
    )
    .await?;

    // 2) Declaraciones (CONTAINS) y después llamadas (CALLS)
    for fact in ordered_facts(&file.facts) {
        tx.run(fact_query(fact, &path, &repo_id)).await?;
    }

    Ok(())
}

/// Declaraciones antes que llamadas: así la llamada a una función declarada en
/// el mismo fichero se fusiona con ese nodo en vez de crear un stub aparte, y
/// una segunda pasada no añade relaciones nuevas.
pub fn ordered_facts(facts: &[CodeFact]) -> impl Iterator<Item = &CodeFact> {
    let decls = facts
        .iter()
        .filter(|f| matches!(f, CodeFact::Declaration { .. }));
    let calls = facts.iter().filter(|f| matches!(f, CodeFact::Call { .. }));
    decls.chain(calls)
}

fn fact_query(fact: &CodeFact, path: &str, repo_id: &str) -> Query {
    match fact {
        CodeFact::Declaration {
            kind,
            name,
            node_kind,
            line,
        } => query(&merge_declaration(*kind))
            .param("path", path.to_string())
            .param("repo_id", repo_id.to_string())
            .param("name", name.clone())
            .param("kind", node_kind.clone())
            .param("line", *line),
        CodeFact::Call { callee } => call_query(path, repo_id, callee),
    }
}

fn call_query(path: &str, repo_id: &str, callee: &str) -> Query {
    query(MERGE_CALL)
        .param("path", path.to_string())
        .param("repo_id", repo_id.to_string())
        .param("name", callee.to_string())
}

/// Resumen legible de las relaciones para el prompt.
pub fn format_relations(relations: &[GraphRelation]) -> String {
    relations
        .iter()
        .map(|r| match &r.name {
            Some(name) => format!("{} → [{}] {}", r.path, r.label, name),
            None => format!("{} → [{}]", r.path, r.label),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
