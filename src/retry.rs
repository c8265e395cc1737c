//! Fixed-delay retry policy applied at network boundaries.
//!
//! Exhausting the attempts returns the last underlying error unchanged; there
//! is no wrapping "retries exhausted" error.

use std::time::Duration;

/// Default number of attempts when `RETRY_ATTEMPTS` is unset.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Retry policy: a maximum attempt count and a fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_ATTEMPTS, DEFAULT_DELAY)
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` tries (at least one) and a fixed `delay`.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Default policy with the attempt count read from `RETRY_ATTEMPTS`.
    pub fn from_env() -> Self {
        let attempts = std::env::var("RETRY_ATTEMPTS")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_ATTEMPTS);
        Self::fixed(attempts, DEFAULT_DELAY)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op` until it succeeds or the attempts run out.
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "retrying after failure"
                    );
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let mut calls = 0;
        let out: Result<u32, String> = policy.run("test", || {
            calls += 1;
            if calls < 3 { Err(format!("fail {calls}")) } else { Ok(7) }
        });
        assert_eq!(out, Ok(7));
        assert_eq!(calls, 3);
    }

    #[test]
    fn surfaces_last_error_when_exhausted() {
        let policy = RetryPolicy::fixed(2, Duration::ZERO);
        let mut calls = 0;
        let out: Result<(), String> = policy.run("test", || {
            calls += 1;
            Err(format!("fail {calls}"))
        });
        assert_eq!(out, Err("fail 2".to_string()));
        assert_eq!(calls, 2);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy::fixed(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay(), Duration::from_secs(1));
    }
}
