use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tokio::time::Instant;
use tracing::{info, warn};

use relay_core::backend::{BackendStatus, CompletionBackend};
use relay_core::errors::BackendError;
use relay_core::mode::CompletionMode;

/// Retry and circuit breaker settings for [`ReliableBackend`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps a backend with retries and a circuit breaker.
///
/// Rate limits, 5xx and network failures are retried with exponential
/// backoff, preferring the server's `Retry-After`. Retries never run past the
/// caller's `timeout`. After `circuit_breaker_threshold` consecutive failed
/// calls the breaker opens and calls fail fast with `ProviderOverloaded` until
/// the cooldown passes; one successful half-open call closes it again.
pub struct ReliableBackend<B: CompletionBackend> {
    inner: B,
    config: ReliableConfig,
    circuit_state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
}

impl<B: CompletionBackend> ReliableBackend<B> {
    pub fn new(inner: B, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: B) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn check_circuit(&self) -> Result<(), BackendError> {
        let state = *self.circuit_state.read();
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } if since.elapsed() >= self.config.circuit_breaker_cooldown => {
                *self.circuit_state.write() = CircuitState::HalfOpen;
                Ok(())
            }
            CircuitState::Open { .. } => Err(BackendError::ProviderOverloaded),
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!(backend = self.inner.name(), "circuit breaker closed");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.circuit_state.write();
        let trip = match *state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= self.config.circuit_breaker_threshold,
            CircuitState::Open { .. } => false,
        };
        if trip {
            warn!(
                backend = self.inner.name(),
                failures,
                cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                "circuit breaker opened"
            );
            *state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    /// Backoff before retry number `attempt` (0-based).
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        let exp_ms = self.config.base_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = exp_ms.min(self.config.max_delay.as_millis() as f64);

        let spread = capped * self.config.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match *self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[async_trait]
impl<B: CompletionBackend> CompletionBackend for ReliableBackend<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn status(&self) -> BackendStatus {
        BackendStatus {
            circuit: Some(self.circuit_state_name()),
            retries: self.total_retries(),
        }
    }

    async fn complete(
        &self,
        mode: CompletionMode,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, BackendError> {
        self.check_circuit()?;

        let deadline = Instant::now() + timeout;
        let mut attempt = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let err = match self.inner.complete(mode, prompt, remaining).await {
                Ok(text) => {
                    self.record_success();
                    return Ok(text);
                }
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.config.max_retries {
                self.record_failure();
                return Err(err);
            }

            let delay = self.retry_delay(attempt, err.suggested_delay());
            if Instant::now() + delay >= deadline {
                self.record_failure();
                return Err(err);
            }

            self.total_retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying backend call"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
