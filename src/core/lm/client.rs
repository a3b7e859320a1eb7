use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bon::Builder;
use rand::Rng;

use crate::core::errors::LmError;
use crate::core::lm::chat::Chat;
use crate::core::lm::config::LMConfig;
use crate::data::LmUsage;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LMResponse {
    pub completion: String,
    pub usage: LmUsage,
}

/// Transport interface the core consumes. Concrete HTTP providers live
/// outside this crate; tests use [`DummyProvider`](crate::providers::DummyProvider).
#[async_trait]
pub trait LMClient: Send + Sync {
    async fn request(&self, chat: &Chat, config: &LMConfig) -> Result<LMResponse, LmError>;
}

#[derive(Clone, Debug, PartialEq, Builder)]
pub struct RetryPolicy {
    #[builder(default = 2)]
    pub max_retries: u32,
    #[builder(default = Duration::from_millis(100))]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::builder().build()
    }
}

impl RetryPolicy {
    /// Exponential backoff with jitter: `base · 2^attempt + U(0, base)`.
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis().max(1) as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16));
        let jitter = rand::thread_rng().gen_range(0..base);
        Duration::from_millis(exp + jitter)
    }
}

#[derive(Clone, Debug, PartialEq, Builder)]
pub struct BreakerPolicy {
    #[builder(default = 5)]
    pub failure_threshold: u32,
    #[builder(default = Duration::from_secs(30))]
    pub recovery_window: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        BreakerPolicy::builder().build()
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probing: bool,
}

#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub chat: Chat,
    pub completion: String,
    pub model: String,
    pub usage: LmUsage,
}

/// Policy layer over a transport: hard per-request timeout, bounded retries
/// on transient failures, and a per-provider circuit breaker.
///
/// Breaker behavior: after `failure_threshold` consecutive failures against a
/// provider, calls fast-fail with [`LmError::CircuitOpen`] until
/// `recovery_window` has elapsed; the first call after the window runs as a
/// half-open probe while concurrent calls keep fast-failing. A successful
/// probe closes the breaker, a failed one re-opens it.
///
/// Breaker state is process-wide per `LM` value and safe under parallel
/// callers; share one `LM` behind an `Arc` to share the breaker.
#[derive(Builder)]
pub struct LM {
    transport: Arc<dyn LMClient>,
    #[builder(default)]
    pub default_config: LMConfig,
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default)]
    pub breaker: BreakerPolicy,
    #[builder(default = 100)]
    pub history_limit: usize,
    #[builder(skip)]
    breakers: Mutex<HashMap<String, BreakerState>>,
    #[builder(skip)]
    history: Mutex<VecDeque<HistoryEntry>>,
}

impl std::fmt::Debug for LM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LM")
            .field("default_config", &self.default_config)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

impl LM {
    pub fn new(transport: Arc<dyn LMClient>) -> Self {
        LM::builder().transport(transport).build()
    }

    pub async fn request(&self, chat: &Chat, config: &LMConfig) -> Result<LMResponse, LmError> {
        let provider = config.provider().to_string();
        self.check_breaker(&provider)?;

        let result = self.request_with_retries(chat, config).await;
        self.record_outcome(&provider, result.is_ok());

        if let Ok(response) = &result {
            self.push_history(HistoryEntry {
                chat: chat.clone(),
                completion: response.completion.clone(),
                model: config.model.clone(),
                usage: response.usage.clone(),
            });
        }
        result
    }

    async fn request_with_retries(
        &self,
        chat: &Chat,
        config: &LMConfig,
    ) -> Result<LMResponse, LmError> {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(
                config.timeout,
                self.transport.request(chat, config),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(LmError::Timeout {
                    after: config.timeout,
                }),
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        error = %err,
                        "retrying LM request"
                    );
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn check_breaker(&self, provider: &str) -> Result<(), LmError> {
        let mut breakers = lock_unpoisoned(&self.breakers);
        let state = breakers.entry(provider.to_string()).or_default();

        if let Some(opened_at) = state.opened_at {
            if state.probing || opened_at.elapsed() < self.breaker.recovery_window {
                return Err(LmError::CircuitOpen {
                    provider: provider.to_string(),
                });
            }
            // Recovery window elapsed: this caller becomes the half-open probe.
            state.probing = true;
        }
        Ok(())
    }

    fn record_outcome(&self, provider: &str, ok: bool) {
        let mut breakers = lock_unpoisoned(&self.breakers);
        let state = breakers.entry(provider.to_string()).or_default();

        if ok {
            *state = BreakerState::default();
            return;
        }

        if state.opened_at.is_some() {
            // Failed probe: re-open for a fresh window.
            state.opened_at = Some(Instant::now());
            state.probing = false;
            return;
        }

        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.breaker.failure_threshold {
            state.opened_at = Some(Instant::now());
            tracing::warn!(provider, "circuit opened");
        }
    }

    fn push_history(&self, entry: HistoryEntry) {
        if self.history_limit == 0 {
            return;
        }
        let mut history = lock_unpoisoned(&self.history);
        if history.len() == self.history_limit {
            history.pop_front();
        }
        history.push_back(entry);
    }

    /// The `n` most recent completed requests, newest first.
    pub fn inspect_history(&self, n: usize) -> Vec<HistoryEntry> {
        lock_unpoisoned(&self.history)
            .iter()
            .rev()
            .take(n)
            .cloned()
            .collect()
    }
}

fn lock_unpoisoned<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
