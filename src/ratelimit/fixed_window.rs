//! Fixed-window rate limiter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::clock::{Clock, SystemClock};
use super::table::{ClientState, IdentityTable};
use crate::error::{Result, TurnstileError};

/// Counter state for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Requests admitted in the current window
    pub count: u64,
    /// When the current window started
    pub window_start: Instant,
}

impl ClientState for WindowState {
    fn last_activity(&self) -> Instant {
        self.window_start
    }
}

/// Counts admitted requests per identity within a rolling window.
///
/// Each identity's window starts at its own first request (or at the request
/// that rolled the previous window over), never on a wall-clock boundary.
pub struct FixedWindowLimiter {
    /// Length of the admission window
    window: Duration,
    /// Maximum admitted requests per identity per window
    limit: u64,
    /// Per-identity counters
    table: IdentityTable<WindowState>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    /// Create a limiter admitting `limit_per_window` requests per `window`.
    ///
    /// Fails if either the window or the limit is zero.
    pub fn new(window: Duration, limit_per_window: u64) -> Result<Self> {
        if window.is_zero() {
            return Err(TurnstileError::InvalidPolicy(
                "fixed window duration must be greater than zero".to_string(),
            ));
        }
        if limit_per_window == 0 {
            return Err(TurnstileError::InvalidPolicy(
                "limit per window must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            window,
            limit: limit_per_window,
            table: IdentityTable::new(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` as the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spread the identity table over `shards` independently locked shards.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.table = IdentityTable::with_shards(shards);
        self
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the per-window limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Snapshot of the counter for `identity`, if it has one.
    pub fn state(&self, identity: &str) -> Option<WindowState> {
        self.table.get(identity)
    }

    /// Requests `identity` may still make in its current window.
    pub fn remaining(&self, identity: &str) -> u64 {
        let now = self.clock.now();
        match self.table.get(identity) {
            Some(state) if now.saturating_duration_since(state.window_start) < self.window => {
                self.limit.saturating_sub(state.count)
            }
            _ => self.limit,
        }
    }

    /// Get the duration until the window of `identity` resets.
    ///
    /// Returns `Duration::ZERO` for unknown identities and expired windows.
    pub fn duration_until_reset(&self, identity: &str) -> Duration {
        let now = self.clock.now();
        self.table
            .get(identity)
            .map(|state| {
                self.window
                    .saturating_sub(now.saturating_duration_since(state.window_start))
            })
            .unwrap_or(Duration::ZERO)
    }

    /// Drop all counters.
    pub fn clear(&self) {
        self.table.clear();
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn allow(&self, identity: &str) -> bool {
        let now = self.clock.now();
        let window = self.window;
        let limit = self.limit;

        let allowed = self.table.admit(
            identity,
            || WindowState {
                count: 1,
                window_start: now,
            },
            |state| {
                if now.saturating_duration_since(state.window_start) >= window {
                    state.count = 1;
                    state.window_start = now;
                    return true;
                }

                if state.count < limit {
                    state.count += 1;
                    return true;
                }

                false
            },
        );

        trace!(identity = %identity, allowed, "Fixed window decision");
        if !allowed {
            debug!(identity = %identity, limit, "Rate limit exceeded");
        }

        allowed
    }

    fn evict_stale(&self, max_age: Duration) -> usize {
        // A counter whose window is still open holds a live budget; dropping it
        // would hand a throttled identity a fresh window.
        self.table
            .evict_older_than(max_age.max(self.window), self.clock.now())
    }

    fn tracked_identities(&self) -> usize {
        self.table.len()
    }

    fn name(&self) -> &'static str {
        "fixed_window"
    }
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("window", &self.window)
            .field("limit", &self.limit)
            .field("tracked", &self.table.len())
            .finish()
    }
}
