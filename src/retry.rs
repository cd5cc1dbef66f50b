//! Bounded exponential backoff for external calls.
//!
//! Every extraction, embedding, and labeling request goes through one
//! [`RetryPolicy`]. Retries are localized to the failing unit (one window,
//! one batch, one node); exhausting them degrades that unit to its fallback
//! behavior instead of aborting the document.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::TreeConfig;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry; doubles per attempt.
    pub initial_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Multiply each delay by a random factor in `[0.5, 1.5)`.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a policy from pipeline configuration, with jitter enabled.
    pub fn from_config(config: &TreeConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.retry_initial_delay,
            max_delay: config.retry_max_delay,
            jitter: true,
        }
    }

    /// A policy that never sleeps and never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Run `f` until it succeeds or the retry budget is exhausted, returning
    /// the final error in the latter case.
    pub fn run<T>(
        &self,
        what: &str,
        mut f: impl FnMut() -> std::result::Result<T, String>,
    ) -> std::result::Result<T, String> {
        let mut delay = self.initial_delay;
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(err);
                    }
                    warn!(what, attempt, error = %err, "external call failed, retrying");

                    let mut sleep_for = delay.min(self.max_delay);
                    if self.jitter {
                        let factor = 0.5 + rand::thread_rng().gen::<f64>();
                        sleep_for = sleep_for.mul_f64(factor);
                    }
                    std::thread::sleep(sleep_for);

                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    #[test]
    fn succeeds_without_retrying() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy(3).run("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(42)
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy(3).run("test", || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("transient".to_string())
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_budget() {
        let calls = AtomicUsize::new(0);
        let result: std::result::Result<(), String> = fast_policy(2).run("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("permanent".to_string())
        });
        assert_eq!(result, Err("permanent".to_string()));
        // 1 initial attempt + 2 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
