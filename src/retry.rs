use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::ProviderError;

/// Explicit retry policy shared by the ingestion pipeline and the simulation
/// engine: a bounded number of retries with exponential backoff plus random
/// jitter, applied only to errors the provider classifies as retryable.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (5 means up to 6 total attempts).
    pub max_retries: u32,
    /// Backoff base; the delay before retry `n` is `base * 2^n`.
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay before retry `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..=self.max_jitter.as_secs_f64());
        self.backoff(attempt) + Duration::from_secs_f64(jitter)
    }

    /// Run `op` until it succeeds, fails permanently, or exhausts the retry
    /// budget. The final error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.jittered_backoff(attempt);
                    tracing::warn!(
                        "retryable provider error (attempt {}/{}), backing off {:.1}s: {}",
                        attempt + 1,
                        self.max_retries,
                        delay.as_secs_f64(),
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
