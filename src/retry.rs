use std::{thread, time::Duration};
use tracing::warn;

/// Bounded exponential backoff settings.
///
/// `max_retries` counts retries, not attempts: an operation runs at most
/// `max_retries + 1` times.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(8))
    }
}

#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    current_attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
        }
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.policy.max_retries {
            return None;
        }
        let factor = 2_u32.saturating_pow(self.current_attempt);
        let delay = self
            .policy
            .initial_delay
            .saturating_mul(factor)
            .min(self.policy.max_delay);
        self.current_attempt += 1;
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt + 1
    }
}

/// Run `op` until it succeeds or the policy's retries run out.
///
/// On exhaustion returns the last error together with the number of attempts made.
pub fn retry_with_backoff<T, F>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, (anyhow::Error, u32)>
where
    F: FnMut() -> anyhow::Result<T>,
{
    let mut backoff = Backoff::new(*policy);
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                let attempts = backoff.attempts();
                let Some(delay) = backoff.next_delay() else {
                    return Err((e, attempts));
                };
                warn!(
                    "{} failed (attempt {} of {}): {:#}. Retrying in {:?}",
                    what,
                    attempts,
                    policy.max_attempts(),
                    e,
                    delay
                );
                thread::sleep(delay);
            }
        }
    }
}
