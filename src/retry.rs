use anyhow::Result;
use std::time::Duration;

use crate::ui::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts have
/// failed, sleeping `policy.delay` between attempts. Returns the last error.
pub fn retry<T>(policy: RetryPolicy, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.max_attempts => return Err(err),
            Err(err) => {
                emit(
                    Level::Warn,
                    "retry.attempt_failed",
                    &format!(
                        "{} failed (attempt {}/{}): {:#}",
                        what, attempt, policy.max_attempts, err
                    ),
                    None,
                );
                std::thread::sleep(policy.delay);
                attempt += 1;
            }
        }
    }
}
