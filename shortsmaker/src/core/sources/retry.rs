//! Retry policy for network-backed collaborators.
//!
//! Only transient failures ([`CoreError::is_transient`]) are retried. When
//! the policy asks for it, the notifier hears about the final failure once;
//! its own errors are logged and never replace the original one.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::Notifier;
use crate::core::types::InterruptFlag;
use crate::core::CoreResult;

/// Retry behaviour, `retry` section of the configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// When false, every call runs exactly once
    pub enable: bool,
    /// Total attempts, including the first
    pub max_retries: u32,
    /// Seconds to wait between attempts
    pub delay: f64,
    /// Send a notification after the last failed attempt
    pub notify: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enable: true,
            max_retries: 3,
            delay: 5.0,
            notify: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that runs once and stays quiet
    pub fn disabled() -> Self {
        Self {
            enable: false,
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        if self.enable {
            self.max_retries.max(1)
        } else {
            1
        }
    }

    pub fn delay(&self) -> Duration {
        if self.enable && self.delay.is_finite() && self.delay > 0.0 {
            Duration::from_secs_f64(self.delay)
        } else {
            Duration::ZERO
        }
    }

    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.enable && self.max_retries == 0 {
            problems.push("retry.max_retries must be >= 1".to_string());
        }
        if !(self.delay.is_finite() && self.delay >= 0.0) {
            problems.push(format!("retry.delay must be >= 0, got {}", self.delay));
        }
        problems
    }

    /// Runs `op` until it succeeds, fails permanently or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T, F>(
        &self,
        name: &str,
        notifier: &dyn Notifier,
        interrupt: &InterruptFlag,
        mut op: F,
    ) -> CoreResult<T>
    where
        F: FnMut(u32) -> CoreResult<T>,
    {
        let attempts = self.attempts();
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            interrupt.check()?;
            match op(attempt) {
                Ok(value) => {
                    info!(
                        "{} completed in {:.2}s after {} attempt(s)",
                        name,
                        started.elapsed().as_secs_f64(),
                        attempt
                    );
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        name,
                        attempt,
                        attempts,
                        err,
                        self.delay()
                    );
                    std::thread::sleep(self.delay());
                    attempt += 1;
                }
                Err(err) => {
                    error!("{} failed after {} attempt(s): {}", name, attempt, err);
                    if self.notify {
                        let message = format!(
                            "{} failed after {} attempt(s).\nError: {}",
                            name, attempt, err
                        );
                        if let Err(notify_err) = notifier.notify(&message) {
                            warn!("Failure notification not delivered: {}", notify_err);
                        }
                    }
                    return Err(err);
                }
            }
        }
    }
}
