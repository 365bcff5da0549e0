// src/retry/backoff.rs

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exponential backoff with jitter, used for dialing backends and re-dialing
/// after a lost connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Keep calling `f` until it succeeds. Returns `None` if `cancel` fires first,
    /// including while sleeping between attempts.
    pub async fn retry_until_cancelled<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = f() => result,
            };

            match result {
                Ok(value) => return Some(value),
                Err(error) => {
                    let backoff = self.delay(attempt);
                    debug!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        attempt, error, backoff
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = sleep(backoff) => {}
                    }
                }
            }
        }
    }

    /// base * 2^(attempt - 1), capped at `max`, plus up to 25% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base.as_millis() as u64;
        let max = self.max.as_millis() as u64;

        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(max);

        let jitter = (capped as f64 * rand::random::<f64>() * 0.25) as u64;

        Duration::from_millis(capped + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let counter = AtomicU32::new(0);

        let result = backoff
            .retry_until_cancelled(&cancel, || async {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err("Temporary failure")
                } else {
                    Ok("Success")
                }
            })
            .await;

        assert_eq!(result, Some("Success"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_cancel() {
        let backoff = Backoff::new(Duration::from_millis(5), Duration::from_millis(20));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let result: Option<()> = backoff
            .retry_until_cancelled(&cancel, || async { Err("Always fails") })
            .await;

        assert!(result.is_none());
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));

        let first = backoff.delay(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));

        let late = backoff.delay(20);
        assert!(late >= Duration::from_millis(400) && late <= Duration::from_millis(500));
    }
}
