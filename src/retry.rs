//! Bounded exponential backoff around flaky remote calls.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, warn};

/// Retry knobs for a single remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    initial_delay: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    /// Builds a policy; `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: usize, initial_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            timeout,
        }
    }

    /// Total attempts made before giving up.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay slept after the first failed attempt.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Per-attempt timeout handed to the wrapped operation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invokes `op` until it succeeds or the attempt ceiling is reached.
    ///
    /// `op` receives the per-attempt timeout. Every failure is retried: callers
    /// that need to fail fast on permanent errors classify before calling.
    pub fn call<T, F>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut(Duration) -> Result<T>,
    {
        self.call_with_sleep(label, op, thread::sleep)
    }

    /// Same as [`RetryPolicy::call`] with an injectable sleep function.
    pub fn call_with_sleep<T, F, S>(&self, label: &str, mut op: F, mut sleep: S) -> Result<T>
    where
        F: FnMut(Duration) -> Result<T>,
        S: FnMut(Duration),
    {
        let mut delay = self.initial_delay;
        let mut attempt = 1usize;
        loop {
            match op(self.timeout) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    let class = if is_transient(&err) {
                        "timeout or connection error"
                    } else {
                        "general error"
                    };
                    warn!(
                        call = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "{class}: {err:#}; retrying"
                    );
                    sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        call = label,
                        attempts = self.max_attempts,
                        "remote call failed: {err:#}"
                    );
                    return Err(err).with_context(|| {
                        format!("{label} failed after {} attempts", self.max_attempts)
                    });
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2), Duration::from_secs(60))
    }
}

/// True when the error chain contains a timeout or connection failure.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            return http.is_timeout() || http.is_connect();
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
            );
        }
        false
    })
}
