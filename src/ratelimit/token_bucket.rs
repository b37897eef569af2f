//! Token bucket rate limiter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::clock::{Clock, SystemClock};
use super::table::{ClientState, IdentityTable};
use crate::error::{Result, TurnstileError};

/// How the refill clock advances when a bucket is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillPolicy {
    /// Advance `last_refill` only by the whole tokens credited, keeping
    /// partial progress toward the next token. A bucket that was already full,
    /// or whose credit is clamped at capacity, snaps its clock to the
    /// observation time so idle periods never bank extra credit.
    #[default]
    CarryRemainder,
    /// Set `last_refill` to the observation time on every call. Partial
    /// progress is discarded, so a client polling faster than the refill
    /// period never earns a token back.
    ResetOnObserve,
}

/// Bucket state for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Tokens currently available, always within `[0, capacity]`
    pub tokens: u64,
    /// Reference point for the next refill computation
    pub last_refill: Instant,
    /// Last time the identity called `allow`
    pub last_seen: Instant,
}

impl ClientState for BucketState {
    fn last_activity(&self) -> Instant {
        // Under `CarryRemainder` the refill clock may trail the last call by up
        // to one refill period; eviction must follow actual activity.
        self.last_seen.max(self.last_refill)
    }
}

/// Per-identity token bucket.
pub struct TokenBucketLimiter {
    /// Maximum tokens an identity can hold
    capacity: u64,
    /// Tokens granted on first sight of an identity
    initial_tokens: u64,
    /// Time needed to regenerate one token
    refill_rate: Duration,
    /// Refill clock behaviour
    policy: RefillPolicy,
    /// Per-identity buckets
    table: IdentityTable<BucketState>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Create a token bucket limiter.
    ///
    /// Fails if `capacity` is zero, if `initial_tokens` exceeds `capacity`,
    /// or if `refill_rate` is zero.
    pub fn new(capacity: u64, initial_tokens: u64, refill_rate: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(TurnstileError::InvalidPolicy(
                "bucket capacity must be at least 1".to_string(),
            ));
        }
        if initial_tokens > capacity {
            return Err(TurnstileError::InvalidPolicy(format!(
                "initial tokens ({}) exceed bucket capacity ({})",
                initial_tokens, capacity
            )));
        }
        if refill_rate.is_zero() {
            return Err(TurnstileError::InvalidPolicy(
                "refill rate must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            capacity,
            initial_tokens,
            refill_rate,
            policy: RefillPolicy::default(),
            table: IdentityTable::new(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Select the refill clock behaviour.
    pub fn with_refill_policy(mut self, policy: RefillPolicy) -> Self {
        self.policy = policy;
        self
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

    /// Get the bucket capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Get the tokens granted to new identities.
    pub fn initial_tokens(&self) -> u64 {
        self.initial_tokens
    }

    /// Get the time per regenerated token.
    pub fn refill_rate(&self) -> Duration {
        self.refill_rate
    }

    /// Get the refill clock behaviour.
    pub fn refill_policy(&self) -> RefillPolicy {
        self.policy
    }

    /// Snapshot of the bucket for `identity`, if it has one.
    pub fn state(&self, identity: &str) -> Option<BucketState> {
        self.table.get(identity)
    }

    /// Tokens `identity` could spend right now, refill included.
    ///
    /// Does not modify the bucket.
    pub fn available_tokens(&self, identity: &str) -> u64 {
        let now = self.clock.now();
        match self.table.get(identity) {
            Some(state) => {
                let earned = tokens_earned(now.saturating_duration_since(state.last_refill), self.refill_rate);
                state.tokens.saturating_add(earned).min(self.capacity)
            }
            None => self.initial_tokens,
        }
    }

    /// Drop all buckets.
    pub fn clear(&self) {
        self.table.clear();
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let earned = tokens_earned(elapsed, self.refill_rate);
        let was_full = state.tokens >= self.capacity;
        let refilled = state.tokens.saturating_add(earned);
        state.tokens = refilled.min(self.capacity);

        match self.policy {
            RefillPolicy::ResetOnObserve => state.last_refill = now,
            // Credit beyond capacity is discarded, so is the partial progress.
            RefillPolicy::CarryRemainder if was_full || refilled > self.capacity => {
                state.last_refill = now;
            }
            RefillPolicy::CarryRemainder => {
                let credited = self.refill_rate.as_nanos() * u128::from(earned);
                let credited = u64::try_from(credited)
                    .map(Duration::from_nanos)
                    .unwrap_or(elapsed);
                state.last_refill += credited.min(elapsed);
            }
        }
    }
}

/// Whole tokens regenerated over `elapsed`.
fn tokens_earned(elapsed: Duration, refill_rate: Duration) -> u64 {
    let earned = elapsed.as_nanos() / refill_rate.as_nanos();
    u64::try_from(earned).unwrap_or(u64::MAX)
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, identity: &str) -> bool {
        let now = self.clock.now();

        // A new identity's first request is admitted and paid for out of its
        // initial grant.
        let allowed = self.table.admit(
            identity,
            || BucketState {
                tokens: self.initial_tokens.saturating_sub(1),
                last_refill: now,
                last_seen: now,
            },
            |state| {
                state.last_seen = now;
                self.refill(state, now);

                if state.tokens > 0 {
                    state.tokens -= 1;
                    true
                } else {
                    false
                }
            },
        );

        trace!(identity = %identity, allowed, "Token bucket decision");
        if !allowed {
            debug!(identity = %identity, capacity = self.capacity, "Token bucket empty");
        }

        allowed
    }

    fn evict_stale(&self, max_age: Duration) -> usize {
        self.table.evict_older_than(max_age, self.clock.now())
    }

    fn tracked_identities(&self) -> usize {
        self.table.len()
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("capacity", &self.capacity)
            .field("initial_tokens", &self.initial_tokens)
            .field("refill_rate", &self.refill_rate)
            .field("policy", &self.policy)
            .field("tracked", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn bucket(capacity: u64, initial: u64, refill: Duration) -> (TokenBucketLimiter, ManualClock) {
        let clock = ManualClock::new();
        let limiter = TokenBucketLimiter::new(capacity, initial, refill)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        (limiter, clock)
    }

    fn drain(limiter: &TokenBucketLimiter, identity: &str) {
        while limiter.allow(identity) {}
    }

    #[test]
    fn test_first_request_is_allowed() {
        let (limiter, _) = bucket(1, 1, Duration::from_secs(1));
        assert!(limiter.allow("fresh"));
    }

    #[test]
    fn test_burst_then_refill() {
        let (limiter, clock) = bucket(3, 3, Duration::from_secs(1));

        let decisions: Vec<bool> = (0..4).map(|_| limiter.allow("client")).collect();
        assert_eq!(decisions, vec![true, true, true, false]);

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("client"));
    }

    #[test]
    fn test_refill_after_real_sleep() {
        let limiter = TokenBucketLimiter::new(3, 3, Duration::from_millis(40)).unwrap();

        let decisions: Vec<bool> = (0..4).map(|_| limiter.allow("client")).collect();
        assert_eq!(decisions, vec![true, true, true, false]);

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.allow("client"));
    }

    #[test]
    fn test_waiting_k_periods_grants_k_tokens() {
        let (limiter, clock) = bucket(5, 5, Duration::from_secs(1));
        drain(&limiter, "a");

        clock.advance(Duration::from_secs(3));
        let admitted = (0..10).filter(|_| limiter.allow("a")).count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let (limiter, clock) = bucket(5, 5, Duration::from_secs(1));
        drain(&limiter, "a");

        clock.advance(Duration::from_secs(100));
        let admitted = (0..10).filter(|_| limiter.allow("a")).count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_tokens_stay_within_capacity() {
        let (limiter, clock) = bucket(3, 1, Duration::from_secs(1));

        limiter.allow("a");
        assert_eq!(limiter.state("a").unwrap().tokens, 0);

        clock.advance(Duration::from_secs(1000));
        assert_eq!(limiter.available_tokens("a"), 3);
        limiter.allow("a");
        assert_eq!(limiter.state("a").unwrap().tokens, 2);
    }

    #[test]
    fn test_initial_tokens_below_capacity() {
        let (limiter, _) = bucket(10, 2, Duration::from_secs(1));

        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
    }

    #[test]
    fn test_zero_initial_tokens_admits_only_first_request() {
        let (limiter, clock) = bucket(2, 0, Duration::from_secs(1));

        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("a"));
    }

    #[test]
    fn test_carry_remainder_keeps_partial_progress() {
        let (limiter, clock) = bucket(1, 1, Duration::from_secs(1));
        assert_eq!(limiter.refill_policy(), RefillPolicy::CarryRemainder);
        drain(&limiter, "a");

        clock.advance(Duration::from_millis(600));
        assert!(!limiter.allow("a"));

        clock.advance(Duration::from_millis(600));
        assert!(limiter.allow("a"));
    }

    #[test]
    fn test_carry_remainder_keeps_progress_when_bucket_fills() {
        let (limiter, clock) = bucket(1, 1, Duration::from_secs(1));
        drain(&limiter, "a");

        // Polling faster than the refill period still earns one token per second.
        let admitted = (0..10)
            .filter(|_| {
                clock.advance(Duration::from_millis(700));
                limiter.allow("a")
            })
            .count();
        assert_eq!(admitted, 7);
    }

    #[test]
    fn test_carry_remainder_snaps_clock_when_credit_is_clamped() {
        let (limiter, clock) = bucket(2, 1, Duration::from_secs(1));
        limiter.allow("a");

        clock.advance(Duration::from_millis(5500));
        assert!(limiter.allow("a"));

        let state = limiter.state("a").unwrap();
        assert_eq!(state.tokens, 1);
        assert_eq!(state.last_refill, clock.now());
    }

    #[test]
    fn test_reset_on_observe_discards_partial_progress() {
        let (limiter, clock) = bucket(1, 1, Duration::from_secs(1));
        let limiter = limiter.with_refill_policy(RefillPolicy::ResetOnObserve);
        drain(&limiter, "a");

        clock.advance(Duration::from_millis(600));
        assert!(!limiter.allow("a"));

        // Only 600ms since the last observation.
        clock.advance(Duration::from_millis(600));
        assert!(!limiter.allow("a"));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("a"));
    }

    #[test]
    fn test_carry_remainder_advances_by_whole_tokens() {
        let (limiter, clock) = bucket(5, 1, Duration::from_secs(1));
        limiter.allow("a");
        let start = limiter.state("a").unwrap().last_refill;

        clock.advance(Duration::from_millis(2500));
        limiter.allow("a");

        let state = limiter.state("a").unwrap();
        assert_eq!(state.last_refill - start, Duration::from_secs(2));
        assert_eq!(state.tokens, 1);
    }

    #[test]
    fn test_evict_stale_follows_activity() {
        let (limiter, clock) = bucket(1, 1, Duration::from_secs(3600));

        limiter.allow("idle");
        limiter.allow("busy");
        clock.advance(Duration::from_secs(50));
        // Rejected, but still activity.
        assert!(!limiter.allow("busy"));
        clock.advance(Duration::from_secs(10));

        let removed = limiter.evict_stale(Duration::from_secs(60));

        assert_eq!(removed, 1);
        assert!(limiter.state("idle").is_none());
        assert!(limiter.state("busy").is_some());
    }

    #[test]
    fn test_concurrent_callers_share_one_bucket() {
        let (limiter, _) = bucket(30, 30, Duration::from_secs(3600));

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| (0..10).filter(|_| limiter.allow("shared")).count()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 30);
        assert_eq!(limiter.state("shared").unwrap().tokens, 0);
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let second = Duration::from_secs(1);
        assert!(TokenBucketLimiter::new(0, 0, second).is_err());
        assert!(TokenBucketLimiter::new(3, 4, second).is_err());
        assert!(TokenBucketLimiter::new(3, 3, Duration::ZERO).is_err());
    }

    #[test]
    fn test_refill_policy_serde_names() {
        let policy: RefillPolicy = serde_yaml::from_str("reset_on_observe").unwrap();
        assert_eq!(policy, RefillPolicy::ResetOnObserve);
        let policy: RefillPolicy = serde_yaml::from_str("carry_remainder").unwrap();
        assert_eq!(policy, RefillPolicy::CarryRemainder);
    }
}
