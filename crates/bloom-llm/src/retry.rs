use rand::Rng;
use std::future::Future;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Outcome of a single API attempt that did not succeed.
#[derive(thiserror::Error, Debug)]
pub enum CallError {
    /// Transport failures, rate limiting and server errors.
    #[error("{0}")]
    Retryable(anyhow::Error),

    #[error("{0}")]
    Fatal(anyhow::Error),
}

impl CallError {
    /// Classify a non-success HTTP status.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let err = anyhow::anyhow!("{} API error ({}): {}", provider, status, body);
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            CallError::Retryable(err)
        } else {
            CallError::Fatal(err)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Retryable(_))
    }

    pub fn into_inner(self) -> anyhow::Error {
        match self {
            CallError::Retryable(e) | CallError::Fatal(e) => e,
        }
    }
}

/// Exponential backoff with jitter: `base_delay * 2^(attempt-1) + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
        }
    }

    pub fn none() -> Self {
        Self::new(0)
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(2u32.pow(exp))
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0;

        loop {
            let start_time = Instant::now();

            match op().await {
                Ok(value) => {
                    info!(
                        "{} call succeeded on attempt {} (took {:?})",
                        label,
                        attempt + 1,
                        start_time.elapsed()
                    );
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    warn!("{} call failed with non-retryable error: {}", label, e);
                    return Err(e.into_inner());
                }
                Err(e) => {
                    attempt += 1;
                    warn!("{} call failed on attempt {}: {}", label, attempt, e);

                    if attempt > self.max_retries {
                        error!("All {} retry attempts failed for {}", self.max_retries, label);
                        return Err(e.into_inner());
                    }

                    let delay = self.backoff(attempt) + self.jitter();
                    warn!(
                        "Retrying {} in {:?} (attempt {}/{})",
                        label, delay, attempt, self.max_retries
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
