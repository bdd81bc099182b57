use std::sync::Arc;

use crate::config::AppConfig;
use crate::embedding::Embedder;
use crate::git::RepoCloner;
use crate::graph::GraphStore;
use crate::llm::AnswerGenerator;
use crate::repo_store::RepoStore;
use crate::vector_store::VectorIndex;

/// Clientes externos compartidos por todo el proceso.
/// Se construyen una vez en `main` y se inyectan en ingesta, consulta y borrado.
#[derive(Clone)]
pub struct Services {
    pub repos: Arc<dyn RepoStore>,
    pub vectors: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn GraphStore>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn AnswerGenerator>,
    pub cloner: Arc<dyn RepoCloner>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Services,
}
