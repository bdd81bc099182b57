//! Carga y gestión de configuración de la aplicación (Neo4j + Qdrant + LLM).

use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Modelo de chat por defecto de cada proveedor.
    pub fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-2.0-flash-lite",
        }
    }
}

/// Parámetros de la recuperación híbrida.
#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub top_k: u64,
    pub graph_hops: u32,
    pub graph_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            graph_hops: 2,
            graph_limit: 50,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub database_url: String,
    pub server_addr: String,

    pub git_host: String,
    pub github_token: Option<String>,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub embedding_dim: u64,
    pub llm_chat_model: String,

    pub retrieval: RetrievalConfig,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI")
            .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user = env::var("NEO4J_USER")
            .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let qdrant_url =
            env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".to_string());
        let qdrant_api_key = optional_var("QDRANT_API_KEY");
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://repos.db?mode=rwc".to_string());
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let git_host = env::var("GIT_HOST").unwrap_or_else(|_| "github.com".to_string());
        let github_token = optional_var("GITHUB_TOKEN");

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let embedding_dim = parse_var("EMBEDDING_DIM", 1536)?;
        let llm_chat_model = env::var("LLM_CHAT_MODEL")
            .unwrap_or_else(|_| llm_provider.default_chat_model().to_string());

        let defaults = RetrievalConfig::default();
        let retrieval = RetrievalConfig {
            top_k: parse_var("RAG_TOP_K", defaults.top_k)?,
            graph_hops: parse_var("RAG_GRAPH_HOPS", defaults.graph_hops)?,
            graph_limit: parse_var("RAG_GRAPH_LIMIT", defaults.graph_limit)?,
        };

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            qdrant_url,
            qdrant_api_key,
            database_url,
            server_addr,
            git_host,
            github_token,
            llm_provider,
            llm_embedding_model,
            embedding_dim,
            llm_chat_model,
            retrieval,
        })
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match optional_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("Valor inválido para {key}: {raw}")),
        None => Ok(default),
    }
}
