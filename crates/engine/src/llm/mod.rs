mod gemini;
mod openai;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use devdocs_common::config::LlmRoleConfig;

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::RetryPolicy;

/// One chat completion: the assistant text plus total token spend.
#[derive(Clone, Debug)]
pub struct ChatCompletion {
    pub text: String,
    pub tokens_used: u64,
}

/// Errors from LLM chat calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM HTTP error: {0}")]
    Http(String),

    #[error("LLM auth error: {0}")]
    Auth(String),

    #[error("LLM rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("LLM quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("LLM request timed out: {0}")]
    Timeout(String),

    #[error("LLM connection error: {0}")]
    Connection(String),

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM response parse error: {0}")]
    Parse(String),

    #[error("LLM circuit breaker open (retry in {time_until_retry:.1}s)")]
    CircuitOpen { time_until_retry: f64 },
}

impl LlmError {
    /// Rate limits, timeouts and connection drops retry; everything else
    /// propagates on first occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Connection(_)
        )
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Connection(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<LlmError> for devdocs_common::DevDocsError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::CircuitOpen { time_until_retry } => devdocs_common::DevDocsError::CircuitOpen {
                dependency: "llm_api".to_string(),
                time_until_retry,
            },
            other => devdocs_common::DevDocsError::LlmUnavailable(other.to_string()),
        }
    }
}

/// LLM chat client with provider dispatch, retry and circuit breaking.
pub struct ChatClient {
    http: reqwest::Client,
    config: LlmRoleConfig,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    api_key: String,
}

impl ChatClient {
    /// Create a client for one LLM role. Reads the API key from the
    /// configured env var (or the provider's standard one). Returns None
    /// when the key is not set.
    pub fn new(
        config: LlmRoleConfig,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
    ) -> Option<Self> {
        let env_var = config.api_key_env.clone().unwrap_or_else(|| {
            match config.provider.as_str() {
                "openai" => "OPENAI_API_KEY".to_string(),
                "gemini" => "GEMINI_API_KEY".to_string(),
                other => {
                    tracing::warn!(provider = other, "Unknown LLM provider");
                    String::new()
                }
            }
        });

        if env_var.is_empty() {
            return None;
        }

        let api_key = match std::env::var(&env_var) {
            Ok(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!(
                    env_var = env_var.as_str(),
                    provider = config.provider.as_str(),
                    "API key not set — LLM client disabled for this role"
                );
                return None;
            }
        };

        Some(Self {
            http: reqwest::Client::new(),
            config,
            retry,
            breaker,
            api_key,
        })
    }

    /// Send one system+user exchange to the configured provider, under the
    /// llm_api circuit breaker and retry policy.
    pub async fn chat_completion(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<ChatCompletion, LlmError> {
        let outcome = self
            .breaker
            .call(|| {
                self.retry.run(
                    || self.send_once(system, user, temperature, max_tokens),
                    |e: &LlmError| e.is_retryable(),
                )
            })
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(open) => Err(LlmError::CircuitOpen {
                time_until_retry: open.time_until_retry,
            }),
        };

        if result.is_err() {
            metrics::counter!("llm.api.errors", "provider" => self.config.provider.clone())
                .increment(1);
        }
        result
    }

    /// Single attempt — routes to the provider-specific wire format.
    async fn send_once(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<ChatCompletion, LlmError> {
        match self.config.provider.as_str() {
            "openai" => {
                openai::send_chat_completion(
                    &self.http,
                    self.config.base_url.as_deref(),
                    &self.api_key,
                    &self.config.model,
                    max_tokens,
                    temperature,
                    system,
                    user,
                )
                .await
            }
            "gemini" => {
                gemini::send_generate_content(
                    &self.http,
                    self.config.base_url.as_deref(),
                    &self.api_key,
                    &self.config.model,
                    max_tokens,
                    temperature,
                    system,
                    user,
                )
                .await
            }
            other => Err(LlmError::Api(format!("Unknown provider: {}", other))),
        }
    }
}

/// Object-safe trait for testability (dyn dispatch).
/// Tests provide scripted callers; production uses ChatClient.
pub trait LlmCaller: Send + Sync {
    fn chat<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
        temperature: f64,
        max_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<ChatCompletion, LlmError>> + Send + 'a>>;
}

impl LlmCaller for ChatClient {
    fn chat<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
        temperature: f64,
        max_tokens: u32,
    ) -> Pin<Box<dyn Future<Output = Result<ChatCompletion, LlmError>> + Send + 'a>> {
        Box::pin(self.chat_completion(system, user, temperature, max_tokens))
    }
}
