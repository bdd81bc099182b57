//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! Embeddings siempre con OpenAI; el chat puede ir contra OpenAI o Gemini.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use rig::agent::MultiTurnStreamItem;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use rig::streaming::{StreamedAssistantContent, StreamingPrompt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{AppConfig, LlmProvider};
use crate::embedding::{EmbedError, Embedder};
use crate::error::AppError;

/// Opciones fijas de generación.
pub const TEMPERATURE: f64 = 0.7;
pub const MAX_TOKENS: u64 = 2048;
/// Plazo total de una respuesta, desde la petición hasta el último fragmento.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = r#"
Eres un asistente experto en análisis de código.
Sólo puedes usar la información suministrada en el contexto: fragmentos de ficheros del repositorio y relaciones extraídas de su grafo estructural.
Responde de forma concisa y cita siempre las referencias como ruta:línea.
Si el contexto no contiene la respuesta, di explícitamente que no la sabes.
"#;

/// Generador de respuestas: produce la respuesta como una secuencia de fragmentos.
pub trait AnswerGenerator: Send + Sync {
    fn generate(&self, prompt: String) -> BoxStream<'static, Result<String, AppError>>;
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedError> {
        use rig::client::EmbeddingsClient as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let client = openai::Client::from_env();

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let embeddings = embedding_model
            .embed_texts(texts)
            .await
            .map_err(|e| classify_embedding_error(&e.to_string()))?;

        // Qdrant trabaja con f32
        Ok(embeddings
            .into_iter()
            .map(|emb| emb.vec.into_iter().map(|x| x as f32).collect())
            .collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    /// Abre la generación en streaming contra el proveedor configurado.
    async fn open_stream(&self, prompt: String) -> BoxStream<'static, Result<String, AppError>> {
        use rig::client::CompletionClient as _;
        use rig::providers::{gemini, openai};

        debug!("Generando respuesta con {:?} '{}'", self.provider, self.chat_model);
        match self.provider {
            LlmProvider::OpenAI => {
                let client = openai::Client::from_env();
                let agent = client
                    .agent(&self.chat_model)
                    .preamble(SYSTEM_PROMPT)
                    .temperature(TEMPERATURE)
                    .max_tokens(MAX_TOKENS)
                    .build();
                text_fragments(agent.stream_prompt(prompt).await)
            }
            LlmProvider::Gemini => {
                let client = gemini::Client::from_env();
                let agent = client
                    .agent(&self.chat_model)
                    .preamble(SYSTEM_PROMPT)
                    .temperature(TEMPERATURE)
                    .max_tokens(MAX_TOKENS)
                    .build();
                text_fragments(agent.stream_prompt(prompt).await)
            }
        }
    }
}

#[async_trait]
impl Embedder for LlmManager {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedError> {
        debug!("Solicitando {} embeddings a OpenAI", texts.len());
        self.embed_with_openai(texts).await
    }
}

impl AnswerGenerator for LlmManager {
    fn generate(&self, prompt: String) -> BoxStream<'static, Result<String, AppError>> {
        let manager = self.clone();
        let fragments = stream::once(async move { manager.open_stream(prompt).await }).flatten();
        with_deadline(fragments.boxed(), GENERATION_TIMEOUT)
    }
}

/// Se queda sólo con el texto generado; el resto de elementos (uso de tokens,
/// razonamiento, respuesta final agregada) no se reenvía.
fn text_fragments<S, R, E>(items: S) -> BoxStream<'static, Result<String, AppError>>
where
    S: Stream<Item = Result<MultiTurnStreamItem<R>, E>> + Send + 'static,
    R: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    items
        .filter_map(|item| async move {
            match item {
                Ok(MultiTurnStreamItem::StreamItem(StreamedAssistantContent::Text(text))) => {
                    Some(Ok(text.text))
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("Fallo generando la respuesta: {e}");
                    Some(Err(AppError::Generation(e.to_string())))
                }
            }
        })
        .boxed()
}

/// Corta la secuencia con un error si no ha terminado `limit` después del
/// primer poll.
fn with_deadline(
    fragments: BoxStream<'static, Result<String, AppError>>,
    limit: Duration,
) -> BoxStream<'static, Result<String, AppError>> {
    stream::unfold(
        (Some(fragments), None::<Instant>),
        move |(fragments, deadline)| async move {
            let mut fragments = fragments?;
            let deadline = deadline.unwrap_or_else(|| Instant::now() + limit);
            match tokio::time::timeout_at(deadline, fragments.next()).await {
                Ok(Some(item)) => Some((item, (Some(fragments), Some(deadline)))),
                Ok(None) => None,
                Err(_) => {
                    warn!("El modelo no terminó la respuesta en {}s", limit.as_secs());
                    let err = AppError::Generation(format!(
                        "el modelo no respondió en {}s",
                        limit.as_secs()
                    ));
                    Some((Err(err), (None, Some(deadline))))
                }
            }
        },
    )
    .boxed()
}

/// Distingue los límites de peticiones (429) del resto de errores del proveedor.
fn classify_embedding_error(message: &str) -> EmbedError {
    let lower = message.to_lowercase();
    let rate_limited = ["rate limit", "rate_limit", "429", "too many requests"]
        .iter()
        .any(|needle| lower.contains(needle));

    if rate_limited {
        EmbedError::RateLimited(message.to_string())
    } else {
        EmbedError::Provider(message.to_string())
    }
}
