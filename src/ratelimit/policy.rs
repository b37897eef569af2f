//! Limiter policy configuration and construction.
//!
//! A policy names the algorithm and carries its parameters. Durations are
//! expressed in milliseconds so the same description works from YAML files
//! and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::backend::RateLimiter;
use super::clock::{Clock, SystemClock};
use super::fixed_window::FixedWindowLimiter;
use super::table::DEFAULT_SHARDS;
use super::token_bucket::{RefillPolicy, TokenBucketLimiter};
use crate::error::{Result, TurnstileError};

/// Which admission algorithm to run, and with what parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterPolicy {
    /// Rolling fixed-window counter
    FixedWindow {
        /// Window length in milliseconds
        window_ms: u64,
        /// Maximum admitted requests per identity per window
        limit_per_window: u64,
    },
    /// Token bucket
    TokenBucket {
        /// Maximum tokens an identity can hold
        capacity: u64,
        /// Tokens granted on first sight (defaults to `capacity`)
        #[serde(default)]
        initial_tokens: Option<u64>,
        /// Milliseconds needed to regenerate one token
        refill_rate_ms: u64,
        /// Refill clock behaviour
        #[serde(default)]
        refill_policy: RefillPolicy,
    },
}

impl Default for LimiterPolicy {
    fn default() -> Self {
        LimiterPolicy::FixedWindow {
            window_ms: 10_000,
            limit_per_window: 5,
        }
    }
}

impl LimiterPolicy {
    /// Load a policy from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policy");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse rate limit policy: {}", e)))
    }

    /// The algorithm label.
    pub fn algorithm(&self) -> &'static str {
        match self {
            LimiterPolicy::FixedWindow { .. } => "fixed_window",
            LimiterPolicy::TokenBucket { .. } => "token_bucket",
        }
    }

    /// Check that the policy can be built.
    pub fn validate(&self) -> Result<()> {
        self.build_with(1, Arc::new(SystemClock)).map(|_| ())
    }

    /// Build a limiter on the system clock with the default shard count.
    pub fn build(&self) -> Result<Arc<dyn RateLimiter>> {
        self.build_with(DEFAULT_SHARDS, Arc::new(SystemClock))
    }

    /// Build a limiter with an explicit shard count and time source.
    pub fn build_with(&self, shards: usize, clock: Arc<dyn Clock>) -> Result<Arc<dyn RateLimiter>> {
        let limiter: Arc<dyn RateLimiter> = match *self {
            LimiterPolicy::FixedWindow {
                window_ms,
                limit_per_window,
            } => Arc::new(
                FixedWindowLimiter::new(Duration::from_millis(window_ms), limit_per_window)?
                    .with_shards(shards)
                    .with_clock(clock),
            ),
            LimiterPolicy::TokenBucket {
                capacity,
                initial_tokens,
                refill_rate_ms,
                refill_policy,
            } => Arc::new(
                TokenBucketLimiter::new(
                    capacity,
                    initial_tokens.unwrap_or(capacity),
                    Duration::from_millis(refill_rate_ms),
                )?
                .with_refill_policy(refill_policy)
                .with_shards(shards)
                .with_clock(clock),
            ),
        };

        Ok(limiter)
    }
}
