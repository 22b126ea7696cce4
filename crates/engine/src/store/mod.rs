mod cache;
mod documentation;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use devdocs_common::config::StoreConfig;
use devdocs_common::types::{CachedResponse, DocumentationResult};

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::RetryPolicy;

/// PostgreSQL/pgvector client for the documentation and semantic-cache
/// tables. Every query runs under the postgres circuit breaker with the
/// database retry preset; transient connection errors are retried on a
/// fresh pooled connection before surfacing.
pub struct VectorStore {
    pool: PgPool,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("PostgreSQL connection error: {0}")]
    Connection(String),

    #[error("PostgreSQL query error: {0}")]
    Query(String),

    #[error("Vector extension missing: {0}")]
    ExtensionMissing(String),

    #[error("circuit breaker open (retry in {time_until_retry:.1}s)")]
    CircuitOpen { time_until_retry: f64 },
}

impl StoreError {
    /// Connection-level failures are retryable; query/shape errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub(crate) fn from_sqlx(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connection(e.to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

impl From<StoreError> for devdocs_common::DevDocsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CircuitOpen { time_until_retry } => {
                devdocs_common::DevDocsError::CircuitOpen {
                    dependency: "postgres".to_string(),
                    time_until_retry,
                }
            }
            other => devdocs_common::DevDocsError::VectorStoreUnavailable(other.to_string()),
        }
    }
}

/// Pool and extension status for health reporting.
#[derive(Debug, Clone)]
pub struct StoreHealth {
    pub pool_size: u32,
    pub idle_connections: usize,
    pub vector_extension: bool,
}

impl VectorStore {
    /// Connect to PostgreSQL, verify the vector extension, and return a
    /// pooled client.
    pub async fn connect(
        database_url: &str,
        config: &StoreConfig,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, StoreError> {
        tracing::info!(
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            retry,
            breaker,
        };
        store.ensure_vector_extension().await?;
        tracing::info!("PostgreSQL connection established");

        Ok(store)
    }

    /// Make sure the pgvector extension is loaded; the cosine operator and
    /// HNSW indexes depend on it.
    pub async fn ensure_vector_extension(&self) -> Result<(), StoreError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::ExtensionMissing(e.to_string()))?;
        Ok(())
    }

    async fn vector_extension_available(&self) -> bool {
        sqlx::query_scalar::<_, String>("SELECT extname FROM pg_extension WHERE extname = 'vector'")
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten()
            .is_some()
    }

    /// Pool and extension status. Pure read.
    pub async fn health(&self) -> StoreHealth {
        StoreHealth {
            pool_size: self.pool.size(),
            idle_connections: self.pool.num_idle(),
            vector_extension: self.vector_extension_available().await,
        }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run a query factory under the breaker and database retry policy.
    pub(crate) async fn guarded<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let outcome = self
            .breaker
            .call(|| self.retry.run(op, |e: &StoreError| e.is_transient()))
            .await;

        match outcome {
            Ok(result) => result,
            Err(open) => Err(StoreError::CircuitOpen {
                time_until_retry: open.time_until_retry,
            }),
        }
    }
}

/// Object-safe seam over documentation similarity search (dyn dispatch).
/// Tests provide canned indexes; production uses VectorStore.
pub trait DocumentationIndex: Send + Sync {
    fn search_documentation<'a>(
        &'a self,
        query_embedding: &'a [f32],
        frameworks: Option<&'a [String]>,
        top_k: usize,
        min_score: f64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DocumentationResult>, StoreError>> + Send + 'a>>;
}

impl DocumentationIndex for VectorStore {
    fn search_documentation<'a>(
        &'a self,
        query_embedding: &'a [f32],
        frameworks: Option<&'a [String]>,
        top_k: usize,
        min_score: f64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DocumentationResult>, StoreError>> + Send + 'a>>
    {
        Box::pin(self.search_documentation_guarded(query_embedding, frameworks, top_k, min_score))
    }
}

/// Object-safe seam over the vector side of the semantic cache.
pub trait CacheIndex: Send + Sync {
    fn search_by_embedding<'a>(
        &'a self,
        embedding: &'a [f32],
        threshold: f64,
    ) -> Pin<
        Box<dyn Future<Output = Result<Option<(CachedResponse, f64)>, StoreError>> + Send + 'a>,
    >;

    fn upsert<'a>(
        &'a self,
        prompt: &'a str,
        response: &'a str,
        embedding: &'a [f32],
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    fn truncate<'a>(&'a self)
        -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;
}

impl CacheIndex for VectorStore {
    fn search_by_embedding<'a>(
        &'a self,
        embedding: &'a [f32],
        threshold: f64,
    ) -> Pin<
        Box<dyn Future<Output = Result<Option<(CachedResponse, f64)>, StoreError>> + Send + 'a>,
    > {
        Box::pin(self.search_cache_by_embedding(embedding, threshold))
    }

    fn upsert<'a>(
        &'a self,
        prompt: &'a str,
        response: &'a str,
        embedding: &'a [f32],
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(self.upsert_cache(prompt, response, embedding, ttl_seconds))
    }

    fn truncate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(self.truncate_cache())
    }
}
