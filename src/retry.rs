use std::{future::Future, time::Duration};

/// RetryOptions
///
/// `max_retries` counts the attempts made after the first one, so an operation runs at
/// most `max_retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub delay: Duration,
    // Doubles the delay after every failed attempt.
    pub backoff: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
            backoff: true,
        }
    }
}

impl RetryOptions {
    /// Settings used by account provisioning.
    pub fn provisioning() -> Self {
        Self {
            max_retries: 2,
            ..Self::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        if self.backoff {
            self.delay.saturating_mul(2u32.saturating_pow(attempt))
        } else {
            self.delay
        }
    }
}

/// Constraint violations fail the same way on every attempt.
pub fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => !(db.is_unique_violation() || db.is_foreign_key_violation()),
        _ => true,
    }
}

/// retry_database_operation
///
/// Runs `operation` until it succeeds, fails with a non-retryable error, or the retry
/// budget is spent. The last error is returned unchanged.
pub async fn retry_database_operation<T, F, Fut>(
    mut operation: F,
    options: RetryOptions,
) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !is_retryable(&err) || attempt >= options.max_retries => return Err(err),
            Err(err) => {
                let wait = options.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = options.max_retries + 1,
                    retry_in_ms = wait.as_millis() as u64,
                    error = %err,
                    "database operation failed, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
