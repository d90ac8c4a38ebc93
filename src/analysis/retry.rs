// SPDX-License-Identifier: PMPL-1.0-or-later

//! Bounded retry with exponential backoff

use crate::config::AnalysisConfig;
use std::time::Duration;
use tracing::warn;

/// Blocks the caller for a backoff delay. Tests substitute a recorder.
pub type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

pub fn real_sleeper() -> Sleeper {
    Box::new(std::thread::sleep)
}

/// Hard ceiling on request attempts for one analysis, whatever the config says.
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// Every attempt failed; `last_error` is the final failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: String,
}

impl RetryPolicy {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.clamp(1, MAX_ATTEMPTS),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// Pause after failed attempt `attempt` (1-indexed): base * 2^(attempt-1).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds or the attempt bound is reached. No pause
    /// follows the last attempt. The bound never exceeds [`MAX_ATTEMPTS`].
    pub fn run<T>(
        &self,
        sleeper: &dyn Fn(Duration),
        mut op: impl FnMut(u32) -> Result<T, String>,
    ) -> Result<T, RetryExhausted> {
        let bound = self.max_attempts.clamp(1, MAX_ATTEMPTS);
        let mut last_error = String::new();
        for attempt in 1..=bound {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(attempt, max = bound, error = %err, "attempt failed");
                    last_error = err;
                }
            }
            if attempt < bound {
                sleeper(self.delay_after(attempt));
            }
        }
        Err(RetryExhausted {
            attempts: bound,
            last_error,
        })
    }
}
