//! Bounded polling and retry helpers shared by every wait point.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Poll `probe` every `interval` until it yields `Some` or `timeout` elapses.
///
/// The probe always runs at least once.
pub async fn poll_until<T, F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if Instant::now() + interval > deadline {
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Backoff policy for retrying a fallible operation.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub attempts: u32,
    pub initial: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl Backoff {
    pub fn new(attempts: u32, initial: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial,
            factor: 2,
            max: Duration::from_secs(5),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let mult = self.factor.saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(mult).min(self.max)
    }
}

/// Run `op` until it succeeds, `is_retryable` rejects the error, or the
/// attempt budget runs out. The last error is returned on failure.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    backoff: Backoff,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < backoff.attempts && is_retryable(&e) => {
                let delay = backoff.delay_for(attempt);
                debug!("attempt {}/{} failed ({}), retrying in {:?}", attempt, backoff.attempts, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
