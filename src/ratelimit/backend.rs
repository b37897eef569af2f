//! Rate limiter trait shared by the limiter algorithms.

use std::time::Duration;

/// Admission-control contract.
///
/// This trait abstracts over the fixed-window and token-bucket limiters so
/// that the HTTP middleware and the evictor can work with either. `allow` is
/// a short, bounded critical section: it never performs I/O and never
/// awaits, so it is safe to call inline from async request handlers.
pub trait RateLimiter: Send + Sync {
    /// Decide whether `identity` may proceed right now.
    ///
    /// Returns `true` to admit and `false` to reject. A rejection is a normal
    /// outcome, not an error.
    fn allow(&self, identity: &str) -> bool;

    /// Remove the state of every identity idle for at least `max_age`.
    /// State that still constrains its identity (an open window) is kept.
    ///
    /// Returns the number of removed identities.
    fn evict_stale(&self, max_age: Duration) -> usize;

    /// Number of identities currently holding state.
    fn tracked_identities(&self) -> usize;

    /// Short algorithm label used in logs and stats.
    fn name(&self) -> &'static str;
}
