//! Dobles en memoria de cada servicio externo, sólo para tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

use crate::app_state::Services;
use crate::config::{AppConfig, LlmProvider, RetrievalConfig};
use crate::embedding::{EmbedError, Embedder};
use crate::error::AppError;
use crate::git::RepoCloner;
use crate::graph::{ordered_facts, GraphStore};
use crate::llm::AnswerGenerator;
use crate::models::{CodeFact, FileGraph, GraphRelation, RepoStatus, Repository};
use crate::repo_store::RepoStore;
use crate::vector_store::{RetrievedPoint, VectorIndex, VectorPoint};

// ---------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------

/// Embebe cada texto como `[len, 1.0]` tras `rate_limits` rechazos por límite.
#[derive(Default)]
pub struct ScriptedEmbedder {
    rate_limits: Mutex<u32>,
    failure: Option<String>,
    calls: AtomicUsize,
    batches: Mutex<Vec<usize>>,
}

impl ScriptedEmbedder {
    pub fn rate_limited_times(n: u32) -> Self {
        Self {
            rate_limits: Mutex::new(n),
            ..Self::default()
        }
    }

    pub fn always_rate_limited() -> Self {
        Self::rate_limited_times(u32::MAX)
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.failure {
            return Err(EmbedError::Provider(msg.clone()));
        }
        {
            let mut remaining = self.rate_limits.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(EmbedError::RateLimited("429 Too Many Requests".into()));
            }
        }
        self.batches.lock().unwrap().push(texts.len());
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

// ---------------------------------------------------------------------
// Índice vectorial
// ---------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: Mutex<HashMap<String, BTreeMap<String, VectorPoint>>>,
    recreated: Mutex<Vec<(String, u64)>>,
    searches: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryVectorIndex {
    pub fn unavailable() -> Self {
        let index = Self::default();
        index.unavailable.store(true, Ordering::SeqCst);
        index
    }

    pub fn points(&self, collection: &str) -> Vec<VectorPoint> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.lock().unwrap().contains_key(collection)
    }

    pub fn recreated(&self) -> Vec<(String, u64)> {
        self.recreated.lock().unwrap().clone()
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::VectorStore("connection refused".into()));
        }
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn recreate_collection(&self, collection: &str, dimension: u64) -> Result<(), AppError> {
        self.check()?;
        self.collections
            .lock()
            .unwrap()
            .insert(collection.to_string(), BTreeMap::new());
        self.recreated
            .lock()
            .unwrap()
            .push((collection.to_string(), dimension));
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<(), AppError> {
        self.check()?;
        let mut collections = self.collections.lock().unwrap();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| AppError::VectorStore(format!("colección {collection} inexistente")))?;
        for point in points {
            target.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> Result<Vec<RetrievedPoint>, AppError> {
        self.check()?;
        self.searches.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.lock().unwrap();
        let target = collections
            .get(collection)
            .ok_or_else(|| AppError::VectorStore(format!("colección {collection} inexistente")))?;

        let mut hits: Vec<RetrievedPoint> = target
            .values()
            .map(|p| RetrievedPoint {
                score: cosine(&vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k as usize);
        Ok(hits)
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool, AppError> {
        self.check()?;
        Ok(self.collections.lock().unwrap().remove(collection).is_some())
    }
}

// ---------------------------------------------------------------------
// Grafo
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Node {
    label: &'static str,
    props: BTreeMap<String, String>,
}

#[derive(Default)]
struct GraphData {
    next_id: u64,
    nodes: BTreeMap<u64, Node>,
    edges: BTreeSet<(u64, &'static str, u64)>,
}

impl GraphData {
    fn matching(&self, label: &str, key: &[(&str, &str)]) -> Vec<u64> {
        self.nodes
            .iter()
            .filter(|(_, n)| {
                n.label == label
                    && key
                        .iter()
                        .all(|(k, v)| n.props.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// MERGE de Cypher: enlaza con todos los nodos cuyo patrón coincide o crea uno.
    fn merge_node(&mut self, label: &'static str, key: &[(&str, &str)]) -> Vec<u64> {
        let matches = self.matching(label, key);
        if !matches.is_empty() {
            return matches;
        }

        let id = self.next_id;
        self.next_id += 1;
        let props = key
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.nodes.insert(id, Node { label, props });
        vec![id]
    }

    /// `MATCH (f:File) MERGE (called:Function) MERGE (f)-[:CALLS]->(called)`
    fn merge_call(&mut self, files: &[u64], repo: &str, callee: &str) {
        if files.is_empty() {
            return;
        }
        let targets = self.merge_node("Function", &[("name", callee), ("repo_id", repo)]);
        for from in files {
            for to in &targets {
                self.edges.insert((*from, "CALLS", *to));
            }
        }
    }
}

/// Grafo en memoria que reproduce la semántica MERGE de las escrituras reales.
#[derive(Default)]
pub struct MemoryGraph {
    data: Mutex<GraphData>,
    expansions: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryGraph {
    pub fn unavailable() -> Self {
        let graph = Self::default();
        graph.unavailable.store(true, Ordering::SeqCst);
        graph
    }

    /// (nodos, relaciones)
    pub fn counts(&self) -> (usize, usize) {
        let data = self.data.lock().unwrap();
        (data.nodes.len(), data.edges.len())
    }

    pub fn expansions(&self) -> usize {
        self.expansions.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::GraphStore("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn merge_file(&self, repo_id: Uuid, file: &FileGraph) -> Result<(), AppError> {
        self.check()?;
        let repo = repo_id.to_string();
        let path = file.file.path.as_str();
        let mut data = self.data.lock().unwrap();

        let files = data.merge_node("File", &[("path", path), ("repo_id", repo.as_str())]);
        for id in &files {
            if let Some(node) = data.nodes.get_mut(id) {
                node.props
                    .insert("language".into(), file.file.language.clone());
            }
        }

        for fact in ordered_facts(&file.facts) {
            match fact {
                CodeFact::Declaration { kind, name, .. } => {
                    let targets = data.merge_node(
                        kind.label(),
                        &[
                            ("name", name.as_str()),
                            ("file_path", path),
                            ("repo_id", repo.as_str()),
                        ],
                    );
                    for from in &files {
                        for to in &targets {
                            data.edges.insert((*from, "CONTAINS", *to));
                        }
                    }
                }
                CodeFact::Call { callee } => data.merge_call(&files, &repo, callee),
            }
        }
        Ok(())
    }

    async fn merge_calls(
        &self,
        repo_id: Uuid,
        path: &str,
        callees: &[String],
    ) -> Result<(), AppError> {
        self.check()?;
        let repo = repo_id.to_string();
        let mut data = self.data.lock().unwrap();
        let files = data.matching("File", &[("path", path), ("repo_id", repo.as_str())]);
        for callee in callees {
            data.merge_call(&files, &repo, callee);
        }
        Ok(())
    }

    async fn expand(
        &self,
        repo_id: Uuid,
        files: &[String],
        hops: u32,
        limit: usize,
    ) -> Result<Vec<GraphRelation>, AppError> {
        self.check()?;
        self.expansions.fetch_add(1, Ordering::SeqCst);
        let repo = repo_id.to_string();
        let data = self.data.lock().unwrap();
        let in_repo = |id: &u64| {
            data.nodes
                .get(id)
                .is_some_and(|n| n.props.get("repo_id") == Some(&repo))
        };

        let mut relations = Vec::new();
        for (start, node) in &data.nodes {
            let Some(path) = node.props.get("path") else {
                continue;
            };
            if node.label != "File" || !in_repo(start) || !files.contains(path) {
                continue;
            }

            let mut seen = HashSet::from([*start]);
            let mut queue = VecDeque::from([(*start, 0u32)]);
            while let Some((current, depth)) = queue.pop_front() {
                if let Some(n) = data.nodes.get(&current) {
                    if in_repo(&current) {
                        relations.push(GraphRelation {
                            path: path.clone(),
                            label: n.label.to_string(),
                            name: n.props.get("name").cloned(),
                        });
                    }
                }
                if depth == hops {
                    continue;
                }
                for (a, _, b) in &data.edges {
                    let next = if *a == current {
                        *b
                    } else if *b == current {
                        *a
                    } else {
                        continue;
                    };
                    if seen.insert(next) {
                        queue.push_back((next, depth + 1));
                    }
                }
            }
        }
        relations.truncate(limit);
        Ok(relations)
    }

    async fn delete_repo(&self, repo_id: Uuid) -> Result<u64, AppError> {
        self.check()?;
        let repo = repo_id.to_string();
        let mut data = self.data.lock().unwrap();
        let doomed: HashSet<u64> = data
            .nodes
            .iter()
            .filter(|(_, n)| n.props.get("repo_id") == Some(&repo))
            .map(|(id, _)| *id)
            .collect();
        data.nodes.retain(|id, _| !doomed.contains(id));
        data.edges
            .retain(|(a, _, b)| !doomed.contains(a) && !doomed.contains(b));
        Ok(doomed.len() as u64)
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.check()
    }
}

// ---------------------------------------------------------------------
// Tabla `repos`
// ---------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRepoStore {
    rows: Mutex<HashMap<Uuid, Repository>>,
    failing_deletes: AtomicBool,
}

impl MemoryRepoStore {
    pub fn with_repo(id: Uuid, status: RepoStatus) -> Self {
        let store = Self::default();
        store.rows.lock().unwrap().insert(
            id,
            Repository {
                id,
                owner: "octo".into(),
                name: "hello".into(),
                branch: "main".into(),
                status,
                error_message: None,
                vector_collection: None,
            },
        );
        store
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Repository> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    /// A partir de aquí `delete` falla como si la base de datos no respondiera.
    pub fn fail_deletes(&self) {
        self.failing_deletes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RepoStore for MemoryRepoStore {
    async fn get(&self, id: Uuid) -> Result<Option<Repository>, AppError> {
        Ok(self.snapshot(id))
    }

    async fn try_mark_cloning(&self, id: Uuid) -> Result<bool, AppError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(repo) if repo.status != RepoStatus::Cloning => {
                repo.status = RepoStatus::Cloning;
                repo.error_message = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_ready(&self, id: Uuid, collection: &str) -> Result<(), AppError> {
        if let Some(repo) = self.rows.lock().unwrap().get_mut(&id) {
            repo.status = RepoStatus::Ready;
            repo.error_message = None;
            repo.vector_collection = Some(collection.to_string());
        }
        Ok(())
    }

    async fn mark_error(&self, id: Uuid, message: &str) -> Result<(), AppError> {
        let message =
            crate::error::truncate_message(message, crate::error::MAX_ERROR_MESSAGE_CHARS);
        if let Some(repo) = self.rows.lock().unwrap().get_mut(&id) {
            repo.status = RepoStatus::Error;
            repo.error_message = Some(message);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Relational(sqlx::Error::PoolTimedOut));
        }
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }
}

// ---------------------------------------------------------------------
// Clonado
// ---------------------------------------------------------------------

/// Escribe un árbol de ficheros fijo en el destino, o falla con un mensaje.
#[derive(Default)]
pub struct FakeCloner {
    files: Vec<(String, String)>,
    failure: Option<String>,
}

impl FakeCloner {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            files: Vec::new(),
            failure: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl RepoCloner for FakeCloner {
    async fn clone_repo(&self, _repo: &Repository, dest: &Path) -> Result<(), AppError> {
        if let Some(msg) = &self.failure {
            return Err(AppError::Clone(msg.clone()));
        }
        for (rel, content) in &self.files {
            let target = dest.join(rel);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(target, content).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Generación
// ---------------------------------------------------------------------

/// Emite los fragmentos dados y, opcionalmente, un error al final.
#[derive(Default)]
pub struct ScriptedGenerator {
    fragments: Vec<String>,
    failure: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn answering(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing_after(fragments: &[&str], message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::answering(fragments)
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl AnswerGenerator for ScriptedGenerator {
    fn generate(&self, prompt: String) -> BoxStream<'static, Result<String, AppError>> {
        self.prompts.lock().unwrap().push(prompt);
        let mut items: Vec<Result<String, AppError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(msg) = &self.failure {
            items.push(Err(AppError::Generation(msg.clone())));
        }
        stream::iter(items).boxed()
    }
}

// ---------------------------------------------------------------------
// Arnés
// ---------------------------------------------------------------------

/// Conjunto de dobles con acceso a cada uno para las aserciones.
pub struct Harness {
    pub repos: Arc<MemoryRepoStore>,
    pub vectors: Arc<MemoryVectorIndex>,
    pub graph: Arc<MemoryGraph>,
    pub embedder: Arc<ScriptedEmbedder>,
    pub generator: Arc<ScriptedGenerator>,
    pub cloner: Arc<FakeCloner>,
}

impl Harness {
    pub fn new(repo_id: Uuid, status: RepoStatus) -> Self {
        Self {
            repos: Arc::new(MemoryRepoStore::with_repo(repo_id, status)),
            vectors: Arc::new(MemoryVectorIndex::default()),
            graph: Arc::new(MemoryGraph::default()),
            embedder: Arc::new(ScriptedEmbedder::default()),
            generator: Arc::new(ScriptedGenerator::default()),
            cloner: Arc::new(FakeCloner::default()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            repos: self.repos.clone(),
            vectors: self.vectors.clone(),
            graph: self.graph.clone(),
            embedder: self.embedder.clone(),
            generator: self.generator.clone(),
            cloner: self.cloner.clone(),
        }
    }
}

/// Configuración mínima para montar el router en tests.
pub fn test_config() -> AppConfig {
    AppConfig {
        neo4j_uri: "neo4j://localhost:7687".into(),
        neo4j_user: "neo4j".into(),
        neo4j_password: "test".into(),
        qdrant_url: "http://localhost:6334".into(),
        qdrant_api_key: None,
        database_url: "sqlite::memory:".into(),
        server_addr: "127.0.0.1:0".into(),
        git_host: "github.com".into(),
        github_token: None,
        llm_provider: LlmProvider::OpenAI,
        llm_embedding_model: "text-embedding-3-small".into(),
        embedding_dim: 2,
        llm_chat_model: "gpt-4o-mini".into(),
        retrieval: RetrievalConfig::default(),
    }
}
