use crate::config::AppConfig;
use anyhow::Result;
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea índices para las claves de fusión del grafo de código:
/// :File(repo_id, path), :Function(repo_id, name) y :Class(repo_id, name).
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE INDEX file_repo_path IF NOT EXISTS
         FOR (f:File)
         ON (f.repo_id, f.path)",
        "CREATE INDEX function_repo_name IF NOT EXISTS
         FOR (n:Function)
         ON (n.repo_id, n.name)",
        "CREATE INDEX class_repo_name IF NOT EXISTS
         FOR (n:Class)
         ON (n.repo_id, n.name)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (índices de File/Function/Class).");
    Ok(())
}
