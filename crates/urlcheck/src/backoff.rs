//! Wait strategies between retry attempts.

use std::time::Duration;

/// Delay inserted before a retry.
pub trait Backoff: Send + Sync {
    /// Delay before attempt number `attempt` (attempt 0 is the first try).
    fn delay(&self, attempt: u32) -> Duration;
}

/// Waits `attempt × step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub step: Duration,
}

impl LinearBackoff {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Backoff for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}
