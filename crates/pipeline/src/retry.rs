use extract::ExtractionError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

/// Per-attempt timeout plus bounded exponential backoff for transient
/// extractor failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 1000, 10000)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            attempt_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Run `f` until it succeeds, fails permanently, or retries run out.
    pub async fn retry<F, Fut, T>(&self, operation_name: &str, mut f: F) -> Result<T, ExtractionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExtractionError>>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let outcome = match timeout(self.attempt_timeout, f()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ExtractionError::Timeout(self.attempt_timeout)),
            };

            match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_transient() => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %e,
                        "Operation failed permanently"
                    );
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                        return Err(e);
                    }

                    // A server-provided hint may stretch the wait, never past the cap
                    let wait = match &e {
                        ExtractionError::RateLimited { retry_after: Some(hint) } => {
                            backoff.max(*hint).min(self.max_backoff)
                        }
                        _ => backoff,
                    };

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = wait.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(wait).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}
