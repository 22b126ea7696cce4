use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use devdocs_common::config::BreakerConfig;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation — all calls pass through.
    Closed,
    /// Breaker tripped — calls are rejected.
    Open,
    /// Cooldown elapsed — one probe call allowed.
    HalfOpen,
}

/// Error returned when the breaker rejects a call without running it.
#[derive(Debug, thiserror::Error)]
#[error("circuit breaker {circuit} is open (retry in {time_until_retry:.1}s)")]
pub struct CircuitBreakerOpen {
    pub circuit: String,
    pub time_until_retry: f64,
}

/// Point-in-time snapshot of a breaker, for health reporting.
#[derive(Debug, Clone)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub time_until_retry: f64,
}

/// A circuit breaker that opens after consecutive failures reach a threshold
/// and closes again after a successful probe during half-open state.
///
/// The lock guards only state checks and transitions; the protected
/// operation itself runs outside it.
pub struct CircuitBreaker {
    name: String,
    failure_count: AtomicU32,
    failure_threshold: u32,
    cooldown: Duration,
    /// Guards (state, last_failure_time). std::sync::Mutex is fine here:
    /// never held across await points.
    inner: Mutex<CircuitInner>,
}

struct CircuitInner {
    state: CircuitState,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: &BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            failure_count: AtomicU32::new(0),
            failure_threshold: config.failure_threshold,
            cooldown: Duration::from_secs(config.recovery_timeout_seconds),
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                last_failure: None,
            }),
        }
    }

    /// Run `op` under the breaker. When the circuit is open and the
    /// cooldown has not elapsed, fails immediately with
    /// `CircuitBreakerOpen` carrying the remaining cooldown.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<Result<T, E>, CircuitBreakerOpen>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            metrics::counter!("circuit_breaker.rejections", "circuit" => self.name.clone())
                .increment(1);
            return Err(CircuitBreakerOpen {
                circuit: self.name.clone(),
                time_until_retry: self.time_until_retry(),
            });
        }

        let result = op().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        Ok(result)
    }

    /// Check whether a call should be allowed, transitioning Open →
    /// HalfOpen once the cooldown has elapsed.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(last) = inner.last_failure {
                    if last.elapsed() >= self.cooldown {
                        inner.state = CircuitState::HalfOpen;
                        tracing::info!(
                            circuit = %self.name,
                            "Circuit breaker transitioning to half-open"
                        );
                        true
                    } else {
                        false
                    }
                } else {
                    // Shouldn't happen, but be safe.
                    inner.state = CircuitState::Closed;
                    true
                }
            }
            CircuitState::HalfOpen => {
                // Allow the probe call (already transitioned).
                true
            }
        }
    }

    /// Record a successful call — reset failure count, close circuit.
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();

        if inner.state != CircuitState::Closed {
            tracing::info!(
                circuit = %self.name,
                previous_state = ?inner.state,
                "Circuit breaker closing after success"
            );
            inner.state = CircuitState::Closed;
            inner.last_failure = None;
            metrics::counter!("circuit_breaker.recoveries", "circuit" => self.name.clone())
                .increment(1);
        }
    }

    /// Record a failed call — increment failure count, potentially open
    /// circuit. A half-open probe failure reopens immediately.
    pub fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.inner.lock().unwrap();

        inner.last_failure = Some(Instant::now());

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => count >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            tracing::warn!(
                circuit = %self.name,
                failures = count,
                threshold = self.failure_threshold,
                "Circuit breaker OPEN"
            );
            inner.state = CircuitState::Open;
            metrics::counter!("circuit_breaker.trips", "circuit" => self.name.clone()).increment(1);
        }
    }

    /// Seconds remaining until an open circuit allows a probe. Zero when
    /// not open.
    pub fn time_until_retry(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Open {
            return 0.0;
        }
        match inner.last_failure {
            Some(last) => {
                let remaining = self.cooldown.saturating_sub(last.elapsed());
                remaining.as_secs_f64()
            }
            None => 0.0,
        }
    }

    /// Get the current state of the circuit breaker.
    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Pure read of the breaker's status.
    pub fn status(&self) -> CircuitStatus {
        CircuitStatus {
            state: self.current_state(),
            consecutive_failures: self.failure_count.load(Ordering::Relaxed),
            failure_threshold: self.failure_threshold,
            time_until_retry: self.time_until_retry(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of circuit breakers for all external dependencies. Breakers
/// are shared (one instance per dependency, however many clients hold it).
pub struct CircuitBreakerRegistry {
    pub postgres: std::sync::Arc<CircuitBreaker>,
    pub redis: std::sync::Arc<CircuitBreaker>,
    pub llm_api: std::sync::Arc<CircuitBreaker>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: &devdocs_common::config::BreakerDefaults) -> Self {
        Self {
            postgres: std::sync::Arc::new(CircuitBreaker::new("postgres", &config.postgres)),
            redis: std::sync::Arc::new(CircuitBreaker::new("redis", &config.redis)),
            llm_api: std::sync::Arc::new(CircuitBreaker::new("llm_api", &config.llm_api)),
        }
    }

    /// Emit gauge metrics for all circuit breaker states.
    pub fn report_metrics(&self) {
        let all = [&self.postgres, &self.redis, &self.llm_api];

        for cb in &all {
            let state_value = match cb.current_state() {
                CircuitState::Closed => 0.0,
                CircuitState::HalfOpen => 0.5,
                CircuitState::Open => 1.0,
            };
            metrics::gauge!("circuit_breaker.state", "circuit" => cb.name().to_string())
                .set(state_value);
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(&devdocs_common::config::BreakerDefaults::default())
    }
}
