//! Provider fallback chain with retry and backoff.
//!
//! Providers are tried in order. A retryable failure (`Unavailable`, which
//! covers rate limits) is retried up to three times per provider with
//! exponential backoff and jitter (base 250 ms, cap 4 s) before falling
//! through to the next provider. `InvalidInput` is surfaced immediately.

use std::hash::{BuildHasher, Hasher, RandomState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};
use crate::message::Message;

use super::{LlmClient, LlmReply, SamplingParams};

pub const RETRY_ATTEMPTS_PER_PROVIDER: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(4);

/// One provider with a display label for logs and health reporting.
struct Provider {
    label: String,
    client: Arc<dyn LlmClient>,
}

/// Ordered fallback chain over [`LlmClient`] implementations.
pub struct ProviderChain {
    providers: Vec<Provider>,
    /// Set when the whole chain was exhausted on the last call; cleared on
    /// success. `/health` reads this.
    exhausted: AtomicBool,
}

/// Exponential backoff with jitter. The jitter comes from the process-seeded
/// hasher, which is enough spread to avoid retry stampedes.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(4));
    let capped = exp.min(BACKOFF_CAP);
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u32(attempt);
    let jitter_ms = hasher.finish() % (capped.as_millis() as u64 / 2 + 1);
    capped / 2 + Duration::from_millis(jitter_ms)
}

impl ProviderChain {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            exhausted: AtomicBool::new(false),
        }
    }

    pub fn push(mut self, label: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.providers.push(Provider {
            label: label.into(),
            client,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// True when the last call ran out of providers. Used by `/health`.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Sleeps out the backoff for one retryable failure. Errors only when
    /// cancellation fires mid-sleep.
    async fn back_off(
        provider: &Provider,
        attempt: u32,
        error: &Error,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let delay = backoff_delay(attempt);
        warn!(
            provider = %provider.label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "provider failed, backing off"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(Error::Timeout {
                what: "llm call cancelled".to_string(),
                elapsed_ms: 0,
            }),
        }
    }

    fn exhausted_error(&self, last_err: Option<Error>) -> Error {
        self.exhausted.store(true, Ordering::Relaxed);
        last_err.unwrap_or_else(|| Error::Unavailable("provider chain exhausted".to_string()))
    }
}

impl Default for ProviderChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ProviderChain {
    async fn complete(&self, messages: &[Message], params: SamplingParams) -> Result<LlmReply> {
        if self.providers.is_empty() {
            return Err(Error::Unavailable("no providers configured".to_string()));
        }
        let cancel = CancellationToken::new();
        let mut last_err = None;
        for provider in &self.providers {
            for attempt in 0..RETRY_ATTEMPTS_PER_PROVIDER {
                match provider.client.complete(messages, params).await {
                    Ok(reply) => {
                        self.exhausted.store(false, Ordering::Relaxed);
                        return Ok(reply);
                    }
                    Err(e) if e.is_retryable() => {
                        Self::back_off(provider, attempt, &e, &cancel).await?;
                        last_err = Some(e);
                    }
                    // BadRequest class surfaces immediately, unretried.
                    Err(e) => return Err(e),
                }
            }
        }
        Err(self.exhausted_error(last_err))
    }

    async fn stream(
        &self,
        messages: &[Message],
        params: SamplingParams,
        chunk_tx: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<LlmReply> {
        if self.providers.is_empty() {
            return Err(Error::Unavailable("no providers configured".to_string()));
        }
        let mut last_err = None;
        for provider in &self.providers {
            for attempt in 0..RETRY_ATTEMPTS_PER_PROVIDER {
                if cancel.is_cancelled() {
                    return Err(Error::Timeout {
                        what: "llm call cancelled".to_string(),
                        elapsed_ms: 0,
                    });
                }
                match provider
                    .client
                    .stream(messages, params, chunk_tx.clone(), cancel)
                    .await
                {
                    Ok(reply) => {
                        self.exhausted.store(false, Ordering::Relaxed);
                        return Ok(reply);
                    }
                    Err(e) if e.is_retryable() => {
                        Self::back_off(provider, attempt, &e, cancel).await?;
                        last_err = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Err(self.exhausted_error(last_err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    #[test]
    fn backoff_grows_and_stays_capped() {
        for attempt in 0..8 {
            let d = backoff_delay(attempt);
            assert!(d >= BACKOFF_BASE / 2, "attempt {attempt} too short: {d:?}");
            assert!(d <= BACKOFF_CAP, "attempt {attempt} exceeds cap: {d:?}");
        }
    }

    #[tokio::test]
    async fn fallback_reaches_second_provider() {
        let chain = ProviderChain::new()
            .push("down", Arc::new(MockLlm::unavailable()))
            .push("up", Arc::new(MockLlm::reply("fallback reply")));
        let reply = chain
            .complete(&[Message::user("hi")], SamplingParams::default())
            .await
            .unwrap();
        assert_eq!(reply.content, "fallback reply");
        assert!(!chain.is_exhausted());
    }

    #[tokio::test]
    async fn exhausted_chain_reports_unavailable() {
        let chain = ProviderChain::new().push("down", Arc::new(MockLlm::unavailable()));
        let err = chain
            .complete(&[Message::user("hi")], SamplingParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        assert!(chain.is_exhausted());
    }

    #[tokio::test]
    async fn empty_chain_is_unavailable() {
        let chain = ProviderChain::new();
        let err = chain
            .complete(&[], SamplingParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn success_clears_exhausted_flag() {
        let chain = ProviderChain::new().push("flaky", Arc::new(MockLlm::unavailable()));
        let _ = chain.complete(&[], SamplingParams::default()).await;
        assert!(chain.is_exhausted());

        let chain = ProviderChain::new().push("ok", Arc::new(MockLlm::reply("fine")));
        let _ = chain.complete(&[], SamplingParams::default()).await.unwrap();
        assert!(!chain.is_exhausted());
    }
}
