mod local;
mod openai;

use std::future::Future;
use std::pin::Pin;

use devdocs_common::config::EmbeddingsConfig;

use crate::retry::RetryPolicy;
use local::LocalEmbeddingModel;

/// Errors from embedding generation.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding API HTTP error: {0}")]
    Http(String),

    #[error("Embedding API auth error: {0}")]
    Auth(String),

    #[error("Embedding API rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Embedding API quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: u32, got: usize },

    #[error("Embedding model error: {0}")]
    Model(String),

    #[error("Embedding API error: {0}")]
    Api(String),
}

impl EmbeddingError {
    /// Rate limits, timeouts and connection drops are worth retrying;
    /// auth, quota, validation and shape errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Http(_) | Self::Api(_))
    }
}

impl From<EmbeddingError> for devdocs_common::DevDocsError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::InvalidInput(msg) => devdocs_common::DevDocsError::InvalidInput(msg),
            other => devdocs_common::DevDocsError::LlmUnavailable(other.to_string()),
        }
    }
}

enum Backend {
    /// OpenAI-shaped embeddings endpoint.
    Remote {
        http: reqwest::Client,
        api_key: String,
    },
    /// In-process ONNX model, no network.
    Local(LocalEmbeddingModel),
}

/// Client for turning text into fixed-dimension vectors.
///
/// The backend is chosen once at startup from config; both obey the same
/// contract: output length equals `config.dimensions` or the call fails
/// with `DimensionMismatch`. All remote calls run under the LLM retry
/// preset.
pub struct EmbeddingClient {
    backend: Backend,
    config: EmbeddingsConfig,
    retry: RetryPolicy,
}

impl EmbeddingClient {
    /// Create a client for the configured provider. The remote backend
    /// reads its API key from the configured env var; the local backend
    /// loads the ONNX model eagerly so a bad model name fails at startup.
    pub fn new(config: EmbeddingsConfig, retry: RetryPolicy) -> Result<Self, EmbeddingError> {
        let backend = match config.provider.as_str() {
            "openai" => {
                let api_key = std::env::var(&config.api_key_env)
                    .ok()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| {
                        EmbeddingError::Auth(format!("{} not set", config.api_key_env))
                    })?;
                Backend::Remote {
                    http: reqwest::Client::new(),
                    api_key,
                }
            }
            "local" => Backend::Local(LocalEmbeddingModel::load(&config.model)?),
            other => {
                return Err(EmbeddingError::Model(format!(
                    "Unknown embedding provider: {}",
                    other
                )))
            }
        };

        tracing::info!(
            provider = config.provider.as_str(),
            model = config.model.as_str(),
            dimensions = config.dimensions,
            "Embedding client ready"
        );

        Ok(Self {
            backend,
            config,
            retry,
        })
    }

    /// The configured embedding dimension. Constant per deployment.
    pub fn dimensions(&self) -> u32 {
        self.config.dimensions
    }

    /// Embed a single text. Empty or whitespace-only input is rejected.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".into()));
        }

        let mut vectors = self.call_backend(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Api("Empty response from embedding backend".into()))
    }

    /// Embed a batch, preserving index alignment: output[i] is the vector
    /// for texts[i], or None when texts[i] was empty. An empty input list
    /// is rejected.
    pub async fn embed_texts(
        &self,
        texts: &[String],
    ) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "Batch cannot be empty".into(),
            ));
        }

        let mut non_empty: Vec<(usize, String)> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            if !text.trim().is_empty() {
                non_empty.push((i, text.clone()));
            }
        }

        let mut aligned: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        if non_empty.is_empty() {
            return Ok(aligned);
        }

        let batch_size = self.config.batch_size.max(1) as usize;
        let mut vectors = Vec::with_capacity(non_empty.len());
        let inputs: Vec<String> = non_empty.iter().map(|(_, t)| t.clone()).collect();
        for chunk in inputs.chunks(batch_size) {
            vectors.extend(self.call_backend(chunk).await?);
        }

        if vectors.len() != non_empty.len() {
            return Err(EmbeddingError::Api(format!(
                "Backend returned {} vectors for {} inputs",
                vectors.len(),
                non_empty.len()
            )));
        }

        for ((index, _), vector) in non_empty.into_iter().zip(vectors) {
            aligned[index] = Some(vector);
        }

        Ok(aligned)
    }

    /// One backend round-trip for a batch, retried per policy, with
    /// dimension enforcement on every returned vector.
    async fn call_backend(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = self
            .retry
            .run(
                || async {
                    match &self.backend {
                        Backend::Remote { http, api_key } => {
                            openai::call_embeddings(
                                http,
                                &self.config.base_url,
                                api_key,
                                &self.config.model,
                                self.config.dimensions,
                                texts,
                            )
                            .await
                        }
                        Backend::Local(model) => model.embed_batch(texts.to_vec()).await,
                    }
                },
                |e: &EmbeddingError| e.is_retryable(),
            )
            .await?;

        for vector in &vectors {
            if vector.len() != self.config.dimensions as usize {
                metrics::counter!("embedding.dimension_mismatches").increment(1);
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.config.dimensions,
                    got: vector.len(),
                });
            }
        }

        metrics::counter!("embedding.texts").increment(texts.len() as u64);
        Ok(vectors)
    }
}

/// Object-safe seam for embedding generation (dyn dispatch).
/// Tests provide deterministic fakes; production uses EmbeddingClient.
pub trait Embedder: Send + Sync {
    fn embed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbeddingError>> + Send + 'a>>;

    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Option<Vec<f32>>>, EmbeddingError>> + Send + 'a>>;

    fn dimensions(&self) -> u32;
}

impl Embedder for EmbeddingClient {
    fn embed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbeddingError>> + Send + 'a>> {
        Box::pin(self.embed_text(text))
    }

    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Option<Vec<f32>>>, EmbeddingError>> + Send + 'a>>
    {
        Box::pin(self.embed_texts(texts))
    }

    fn dimensions(&self) -> u32 {
        self.dimensions()
    }
}
