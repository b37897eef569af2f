//! Background eviction of stale identity state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::backend::RateLimiter;
use crate::error::{Result, TurnstileError};

/// Periodically removes identities that have been idle for too long.
///
/// `evict_after` is both the sweep interval and the staleness threshold.
pub struct Evictor {
    limiter: Arc<dyn RateLimiter>,
    evict_after: Duration,
}

impl Evictor {
    /// Create an evictor for `limiter`.
    pub fn new(limiter: Arc<dyn RateLimiter>, evict_after: Duration) -> Result<Self> {
        if evict_after.is_zero() {
            return Err(TurnstileError::InvalidPolicy(
                "evict interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            limiter,
            evict_after,
        })
    }

    /// Get the sweep interval and staleness threshold.
    pub fn evict_after(&self) -> Duration {
        self.evict_after
    }

    /// Run one sweep now and return how many identities were removed.
    pub fn sweep(&self) -> usize {
        let removed = self.limiter.evict_stale(self.evict_after);
        let remaining = self.limiter.tracked_identities();

        if removed > 0 {
            info!(
                limiter = self.limiter.name(),
                removed, remaining, "Evicted stale identities"
            );
        } else {
            debug!(limiter = self.limiter.name(), remaining, "Eviction sweep found nothing stale");
        }

        removed
    }

    /// Start sweeping on a background task.
    ///
    /// The task runs until [`EvictorHandle::shutdown`] is called or the
    /// handle is dropped. Must be called from within a Tokio runtime.
    pub fn spawn(self) -> EvictorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.evict_after);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick resolves immediately.
            ticker.tick().await;

            info!(
                limiter = self.limiter.name(),
                interval_ms = u64::try_from(self.evict_after.as_millis()).unwrap_or(u64::MAX),
                "Evictor started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    _ = stop_rx.changed() => {
                        break;
                    }
                }
            }

            info!(limiter = self.limiter.name(), "Evictor stopped");
        });

        EvictorHandle { stop_tx, task }
    }
}

/// Handle to a running evictor task.
pub struct EvictorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EvictorHandle {
    /// Signal the evictor to stop and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            debug!(error = %e, "Evictor task ended abnormally");
        }
    }

    /// Whether the background task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
