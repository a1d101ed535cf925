//! Retry and circuit breaking in front of a model capability.
//!
//! Transient failures (transport errors, rate limits, 5xx) are retried with
//! a fixed backoff. Consecutive failures open the breaker; while it is open
//! every call fails fast with [`Error::ModelCapability`] until the reset
//! timeout lets a half-open trial through.

use super::{ModelCapability, PlanningRequest, PlanningResponse};
use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Resilience configuration for model calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResilienceConfig {
    /// Maximum number of retries for transient failures.
    pub max_retries: u32,
    /// Backoff between retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
}

impl Default for ModelResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff_ms: 250,
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
        }
    }
}

impl ModelResilienceConfig {
    /// Loads resilience settings from the `[llm]` configuration section.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            breaker_failure_threshold: config.breaker_failure_threshold.max(1),
            breaker_reset_timeout_ms: config.breaker_reset_ms,
        }
    }
}

/// Circuit breaker state machine.
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { in_flight: bool },
}

#[derive(Debug)]
struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    fn new(config: &ModelResilienceConfig) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
        }
    }

    fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    self.state = BreakerState::HalfOpen { in_flight: true };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { ref mut in_flight } => {
                if *in_flight {
                    false
                } else {
                    *in_flight = true;
                    true
                }
            },
        }
    }

    const fn on_success(&mut self) {
        self.state = BreakerState::Closed { failures: 0 };
    }

    /// Records a failure; returns true if this failure opened the circuit.
    fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen { .. } => {
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }

    const fn state_value(&self) -> u8 {
        match self.state {
            BreakerState::Closed { .. } => 0,
            BreakerState::Open { .. } => 1,
            BreakerState::HalfOpen { .. } => 2,
        }
    }
}

/// Model capability wrapper with retries and a circuit breaker.
pub struct ResilientModel<M: ModelCapability> {
    inner: M,
    config: ModelResilienceConfig,
    breaker: Mutex<CircuitBreaker>,
}

impl<M: ModelCapability> ResilientModel<M> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: M, config: ModelResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(&config);
        Self {
            inner,
            config,
            breaker: Mutex::new(breaker),
        }
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_outcome(&self, provider: &'static str, status: &'static str, elapsed: Duration) {
        metrics::counter!(
            "llm_requests_total",
            "provider" => provider,
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            "llm_request_duration_ms",
            "provider" => provider,
            "status" => status
        )
        .record(elapsed.as_secs_f64() * 1000.0);
    }

    fn record_failure(&self, provider: &'static str) {
        let mut breaker = self.breaker();
        let tripped = breaker.on_failure();
        let state = breaker.state_value();
        drop(breaker);
        metrics::gauge!("llm_circuit_breaker_state", "provider" => provider)
            .set(f64::from(state));
        if tripped {
            metrics::counter!("llm_circuit_breaker_trips_total", "provider" => provider)
                .increment(1);
            tracing::warn!(provider = provider, "Model circuit breaker opened");
        }
    }
}

/// Transport-level failures are worth another attempt; unparseable output
/// and client errors are not.
const fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::OperationFailed { .. })
}

#[async_trait]
impl<M: ModelCapability> ModelCapability for ResilientModel<M> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn plan(&self, request: &PlanningRequest) -> Result<PlanningResponse> {
        let provider = self.inner.name();

        if !self.breaker().allow() {
            metrics::counter!(
                "llm_requests_total",
                "provider" => provider,
                "status" => "circuit_open"
            )
            .increment(1);
            return Err(Error::ModelCapability(format!(
                "{provider}: circuit breaker open"
            )));
        }

        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let start = Instant::now();
            let result = self.inner.plan(request).await;
            let elapsed = start.elapsed();

            match result {
                Ok(response) => {
                    self.record_outcome(provider, "success", elapsed);
                    self.breaker().on_success();
                    return Ok(response);
                },
                Err(err) if is_retryable(&err) && attempt < max_attempts => {
                    self.record_outcome(provider, "retry", elapsed);
                    tracing::warn!(
                        provider = provider,
                        attempt = attempt,
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying model call"
                    );
                    if self.config.retry_backoff_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(
                            self.config.retry_backoff_ms * u64::from(attempt),
                        ))
                        .await;
                    }
                },
                Err(err) => {
                    self.record_outcome(provider, "error", elapsed);
                    self.record_failure(provider);
                    return Err(match err {
                        Error::ModelCapability(_) => err,
                        other => Error::ModelCapability(other.to_string()),
                    });
                },
            }
        }
    }
}
