use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: usize,
    initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.initial_backoff * (1 << capped)
    }

    /// Runs `op`, retrying transient errors until the attempt budget is
    /// spent. `RateLimited` waits the delay the service asked for instead of
    /// the exponential schedule. Fatal errors propagate immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = match &err {
                        Error::RateLimited { retry_after } => *retry_after,
                        _ => self.backoff(attempt),
                    };
                    attempt += 1;
                    tracing::warn!(
                        "transient failure (attempt {attempt}): {err}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        let calls = AtomicUsize::new(0);

        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::StoreUnavailable("flaky".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        let calls = AtomicUsize::new(0);

        let result: Result<()> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::ConstraintViolation("bad record".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(Error::ConstraintViolation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_the_budget_returns_the_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = AtomicUsize::new(0);

        let result: Result<()> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::SourceUnreachable("down".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(Error::SourceUnreachable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_uses_the_computed_delay() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let calls = AtomicUsize::new(0);

        let start = tokio::time::Instant::now();
        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::RateLimited {
                            retry_after: Duration::from_secs(7),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(7));
    }
}
