use std::thread;
use std::time::Duration;

/// Bounds for one retrying call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// `retries` extra attempts on top of the first one.
    pub fn with_retries(timeout: Duration, retries: u32, base_delay: Duration) -> Self {
        Self {
            timeout,
            max_attempts: retries.saturating_add(1),
            base_delay,
        }
    }

    /// Linear backoff after zero-based `attempt`: `base_delay × (attempt + 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(attempt.saturating_add(1))
            .unwrap_or(Duration::MAX)
    }
}

/// Outcome of one try inside [`run_with_backoff`].
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    Retry(E),
    Fail(E),
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Runs `op` until it succeeds, fails terminally, or the attempt cap is hit.
///
/// `on_retry` sees the failed attempt index, its error and the delay about to
/// be slept. The last error is returned once attempts run out.
pub fn run_with_backoff<T, E, Op, OnRetry>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: Op,
    mut on_retry: OnRetry,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Attempt<T, E>,
    OnRetry: FnMut(u32, &E, Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(err) => return Err(err),
            Attempt::Retry(err) => {
                if attempt + 1 >= max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_after(attempt);
                on_retry(attempt, &err, delay);
                sleeper.sleep(delay);
                attempt += 1;
            }
        }
    }
}
