use std::future::Future;
use tracing::warn;

use crate::config::DEFAULT_RETRY_ATTEMPTS;
use crate::error::{PayoutError, Result};
use crate::metrics::PAGE_READ_RETRIES;

/// Bounded, immediate retry for a single read. Only errors classified as
/// transient by [`PayoutError::is_transient`] are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_ATTEMPTS)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if attempt >= self.max_attempts {
                        return Err(PayoutError::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }

                    warn!("Retry {} of {} after transient failure: {}", attempt, self.max_attempts - 1, e);
                    PAGE_READ_RETRIES.inc();
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
