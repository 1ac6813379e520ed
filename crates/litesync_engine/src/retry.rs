//! Retry scheduling for transient failures.

use crate::config::RetryConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Computes and arms backoff delays after transient failures.
///
/// The delay grows exponentially with the attempt number and resets after
/// any fully successful batch. Arming spawns a timer task; timers armed
/// before a `reset` or `cancel` become no-ops when they fire, so a stale
/// timer can never inject a retry into a replication that has moved on.
pub struct RetryScheduler {
    config: RetryConfig,
    attempt: u32,
    generation: Arc<AtomicU64>,
}

impl RetryScheduler {
    /// Creates a scheduler.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of attempts made since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Arms a timer for the next attempt.
    ///
    /// When the delay elapses, `inject` runs — unless the scheduler was
    /// reset or cancelled in the meantime. Returns the armed delay, or
    /// `None` when attempts are exhausted.
    pub fn arm(&mut self, inject: impl FnOnce() + Send + 'static) -> Option<Duration> {
        self.attempt += 1;
        if let Some(max) = self.config.max_attempts {
            if self.attempt > max {
                return None;
            }
        }

        let delay = self.config.delay_for_attempt(self.attempt);
        let generation = Arc::clone(&self.generation);
        let armed_at = generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::SeqCst) == armed_at {
                inject();
            }
        });
        Some(delay)
    }

    /// Resets the attempt counter after a fully successful batch and
    /// invalidates any armed timer.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Invalidates any armed timer without resetting the attempt counter.
    pub fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
