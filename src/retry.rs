use std::future::Future;
use std::time::Duration;

/// Substrings that mark a failure as transient
pub const RETRYABLE_MESSAGES: &[&str] = &[
    "timeout",
    "ETIMEDOUT",
    "ECONNRESET",
    "ENOTFOUND",
    "ECONNREFUSED",
    "net::ERR_",
    "Navigation timeout",
];

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            multiplier: 2,
        }
    }
}

impl RetryOptions {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

pub fn is_retryable(message: &str) -> bool {
    RETRYABLE_MESSAGES.iter().any(|needle| message.contains(needle))
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of attempts.
///
/// Between attempts `on_retry(attempt, delay)` is called and the task sleeps
/// for `delay`, which starts at `initial_delay`, is multiplied after every
/// retry and never exceeds `max_delay`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    options: &RetryOptions,
    mut operation: F,
    retryable: impl Fn(&E) -> bool,
    mut on_retry: impl FnMut(u32, Duration),
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    let mut delay = options.initial_delay;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= options.max_attempts || !retryable(&err) {
                    return Err(err);
                }

                let current = delay.min(options.max_delay);
                on_retry(attempt, current);
                tracing::debug!(attempt, delay_ms = current.as_millis() as u64, "Retrying");
                tokio::time::sleep(current).await;

                delay = delay.saturating_mul(options.multiplier);
            }
        }
    }
}

/// Display line for a retry, e.g. `: Retry 1/3 after 1000ms`
pub fn retry_line(attempt: u32, max_attempts: u32, delay: Duration) -> String {
    format!(": Retry {}/{} after {}ms", attempt, max_attempts, delay.as_millis())
}
