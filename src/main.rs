// Módulos de la aplicación
mod api;
mod app_state;
mod chunker;
mod config;
mod embedding;
mod error;
mod extractor;
mod git;
mod graph;
mod ingest;
mod languages;
mod llm;
mod models;
mod neo4j_client;
mod purge;
mod rag;
mod repo_store;
mod vector_store;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, Services};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Conectar a Neo4j y asegurar esquemas
    let neo4j = neo4j_client::connect_from_config(&cfg)
        .await
        .context("Error conectando a Neo4j")?;
    neo4j_client::ensure_schema(&neo4j)
        .await
        .context("Error asegurando el esquema de Neo4j")?;

    // 4. Qdrant, base de datos relacional y clonado
    let vectors = vector_store::QdrantIndex::connect_from_config(&cfg)
        .context("Error configurando el cliente de Qdrant")?;
    let repos = repo_store::SqliteRepoStore::connect(&cfg.database_url)
        .await
        .context("Error abriendo la base de datos relacional")?;
    let cloner = git::GitCloner::new(cfg.git_host.clone(), cfg.github_token.clone());

    // 5. Inicializar gestor de LLMs (embeddings + chat)
    let llm_manager = Arc::new(llm::LlmManager::from_config(&cfg));
    info!(
        "LLM: proveedor {:?}, embeddings '{}' (dim {}), chat '{}'",
        cfg.llm_provider, cfg.llm_embedding_model, cfg.embedding_dim, cfg.llm_chat_model
    );

    // 6. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: Arc::new(cfg.clone()),
        services: Services {
            repos: Arc::new(repos),
            vectors: Arc::new(vectors),
            graph: Arc::new(graph::Neo4jGraph::new(Arc::new(neo4j))),
            embedder: llm_manager.clone(),
            generator: llm_manager,
            cloner: Arc::new(cloner),
        },
    };

    // 7. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 8. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    // Apagado ordenado con Ctrl-C
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
