use serde::{Deserialize, Serialize};

/// Top-level system configuration, deserialized from system.toml.
///
/// Every section has serde defaults matching the shipped deployment so a
/// partial file (or none at all, via `SystemConfig::default()`) still yields
/// a runnable configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub safety: SafetyLimits,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub code_gen: CodeGenConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryDefaults,
    #[serde(default)]
    pub breakers: BreakerDefaults,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Hard limits on a single request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Max trips through the validate node before the workflow ends.
    pub max_workflow_iterations: u32,
    /// Max accepted prompt length in characters.
    pub max_prompt_chars: usize,
    /// Whole-request budget. Every external call gets a deadline derived
    /// from what remains of this.
    pub request_timeout_seconds: u64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_workflow_iterations: 3,
            max_prompt_chars: 10_000,
            request_timeout_seconds: 120,
        }
    }
}

/// LLM provider and model configuration per role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_supervisor_role")]
    pub supervisor: LlmRoleConfig,
    #[serde(default = "default_code_gen_role")]
    pub code_gen: LlmRoleConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            supervisor: default_supervisor_role(),
            code_gen: default_code_gen_role(),
        }
    }
}

fn default_supervisor_role() -> LlmRoleConfig {
    LlmRoleConfig {
        provider: "openai".to_string(),
        model: "gpt-4".to_string(),
        max_tokens: 50,
        temperature: Some(0.0),
        base_url: None,
        api_key_env: None,
    }
}

fn default_code_gen_role() -> LlmRoleConfig {
    LlmRoleConfig {
        provider: "openai".to_string(),
        model: "gpt-4".to_string(),
        max_tokens: 2000,
        temperature: Some(0.2),
        base_url: None,
        api_key_env: None,
    }
}

/// Configuration for a single LLM role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmRoleConfig {
    /// Provider name ("openai" for any chat-completions-shaped endpoint,
    /// "gemini" for a generateContent-shaped endpoint).
    pub provider: String,
    /// Model identifier (e.g. "gpt-4", "gemini-1.5-flash").
    pub model: String,
    /// Max tokens in the response.
    pub max_tokens: u32,
    /// Temperature (0.0–1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Base URL override for OpenAI-compatible gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable name for the API key. Defaults to the
    /// provider's standard env var.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

/// Embedding provider configuration.
///
/// `dimensions` is a deployment constant: the cache and documentation
/// tables carry VECTOR(dimensions) columns, so changing it requires a
/// data-drop migration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Provider name ("openai" or "local").
    pub provider: String,
    /// Model identifier (e.g. "text-embedding-3-small", "all-MiniLM-L6-v2").
    pub model: String,
    /// Embedding vector dimensions (1536 remote, 384 local).
    pub dimensions: u32,
    /// Max texts per batch API call.
    pub batch_size: u32,
    /// Base URL for the remote embedding API.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    /// Environment variable name for the API key.
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            dimensions: 384,
            batch_size: 32,
            base_url: default_embedding_base_url(),
            api_key_env: default_embedding_api_key_env(),
        }
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Cross-encoder re-ranking configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Cross-encoder model identifier.
    pub model: String,
    /// Batch size for scoring (query, passage) pairs.
    pub batch_size: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            model: "jina-reranker-v1-turbo-en".to_string(),
            batch_size: 32,
        }
    }
}

/// Documentation search defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Results returned to the caller.
    pub top_k: usize,
    /// Minimum similarity score admitted from the vector store.
    pub min_score: f64,
    /// Re-ranked top score below which the one-shot query reformulation
    /// runs.
    pub self_correction_threshold: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.7,
            self_correction_threshold: 0.7,
        }
    }
}

/// Code generation agent limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodeGenConfig {
    /// Validation-feedback retries after the first attempt
    /// (total attempts = max_retries + 1).
    pub max_retries: u32,
    /// Language assumed when neither framework nor prompt reveals one.
    pub fallback_language: String,
}

impl Default for CodeGenConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            fallback_language: "Python".to_string(),
        }
    }
}

/// Cache TTLs and thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Semantic cache entry TTL in seconds.
    pub semantic_ttl_seconds: u64,
    /// Minimum cosine similarity for a tier-2 semantic cache hit.
    pub similarity_threshold: f64,
    /// Tool-result cache entry TTL in seconds.
    pub tool_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            semantic_ttl_seconds: 3600,
            similarity_threshold: 0.95,
            tool_ttl_seconds: 300,
        }
    }
}

/// Default retry parameters per target family.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryDefaults {
    pub llm_api: RetryConfig,
    pub databases: RetryConfig,
    pub http_tools: RetryConfig,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            llm_api: RetryConfig::default(),
            databases: RetryConfig::default(),
            http_tools: RetryConfig::default(),
        }
    }
}

/// Retry configuration for a specific target.
///
/// Wait between attempts is `clamp(multiplier_ms * 2^(attempt - 1),
/// min_wait_ms, max_wait_ms)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub multiplier_ms: u64,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            multiplier_ms: 1000,
            min_wait_ms: 1000,
            max_wait_ms: 10_000,
        }
    }
}

/// Circuit breaker thresholds per protected dependency.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerDefaults {
    pub postgres: BreakerConfig,
    pub redis: BreakerConfig,
    pub llm_api: BreakerConfig,
}

impl Default for BreakerDefaults {
    fn default() -> Self {
        Self {
            postgres: BreakerConfig::default(),
            redis: BreakerConfig::default(),
            llm_api: BreakerConfig::default(),
        }
    }
}

/// A single circuit breaker's thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before allowing a probe.
    pub recovery_timeout_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
        }
    }
}

/// Vector store connection pool bounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    pub min_connections: u32,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
        }
    }
}
