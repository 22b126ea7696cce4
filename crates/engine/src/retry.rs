use std::future::Future;
use std::time::Duration;

use devdocs_common::config::{RetryConfig, RetryDefaults};

/// Explicit retry policy for one target family of calls.
///
/// Replaces ad-hoc per-call backoff loops: call sites construct (or receive)
/// a policy and run their operation through it. Only errors the supplied
/// classifier marks retryable are retried; everything else propagates on the
/// first occurrence.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    target: &'static str,
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(target: &'static str, config: RetryConfig) -> Self {
        Self { target, config }
    }

    /// Preset for LLM chat/embedding calls (rate limits, timeouts,
    /// connection drops).
    pub fn llm_api(defaults: &RetryDefaults) -> Self {
        Self::new("llm_api", defaults.llm_api.clone())
    }

    /// Preset for database calls (connection lost, too many connections).
    pub fn database(defaults: &RetryDefaults) -> Self {
        Self::new("databases", defaults.databases.clone())
    }

    /// Preset for HTTP tool calls (timeouts, network errors).
    pub fn http_tool(defaults: &RetryDefaults) -> Self {
        Self::new("http_tools", defaults.http_tools.clone())
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Wait before the given retry: clamp(multiplier · 2^(attempt−1),
    /// min_wait, max_wait). `attempt` is the 1-based attempt that just
    /// failed.
    pub fn wait_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let raw = self.config.multiplier_ms.saturating_mul(1u64 << exp);
        let clamped = raw.clamp(self.config.min_wait_ms, self.config.max_wait_ms);
        Duration::from_millis(clamped)
    }

    /// Run `op` up to `max_attempts` times, sleeping between attempts.
    /// `is_retryable` decides whether a given error is worth another try.
    pub async fn run<T, E, F, Fut, R>(&self, mut op: F, is_retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => {
                    metrics::counter!("retry.non_retryable", "target" => self.target).increment(1);
                    return Err(e);
                }
                Err(e) => {
                    if attempt >= self.config.max_attempts {
                        metrics::counter!("retry.exhausted", "target" => self.target).increment(1);
                        tracing::warn!(
                            target = self.target,
                            attempts = attempt,
                            error = %e,
                            "Retries exhausted"
                        );
                        return Err(e);
                    }
                    let wait = self.wait_for_attempt(attempt);
                    tracing::warn!(
                        target = self.target,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Transient error, retrying"
                    );
                    metrics::counter!("retry.attempts", "target" => self.target).increment(1);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
