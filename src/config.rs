//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::http::{IdentityResolver, IdentitySource};
use crate::ratelimit::{LimiterPolicy, DEFAULT_SHARDS};

/// Prefix for environment variable overrides, e.g. `TURNSTILE_SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Client identity configuration
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Algorithm and parameters
    #[serde(default)]
    pub policy: LimiterPolicy,

    /// Eviction sweep interval and staleness threshold in milliseconds
    #[serde(default = "default_evict_interval")]
    pub evict_interval_ms: u64,

    /// Number of independently locked identity table shards
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            policy: LimiterPolicy::default(),
            evict_interval_ms: default_evict_interval(),
            shards: default_shards(),
        }
    }
}

fn default_evict_interval() -> u64 {
    60_000
}

fn default_shards() -> usize {
    DEFAULT_SHARDS
}

impl RateLimitingConfig {
    /// Get the eviction interval.
    pub fn evict_interval(&self) -> Duration {
        Duration::from_millis(self.evict_interval_ms)
    }
}

/// Client identity configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Where the identity comes from
    #[serde(default)]
    pub source: IdentitySource,

    /// Header carrying the identity when `source` is `header`
    #[serde(default)]
    pub header: Option<String>,
}

impl IdentityConfig {
    /// Build the resolver described by this section.
    pub fn resolver(&self) -> Result<IdentityResolver> {
        IdentityResolver::from_source(self.source, self.header.as_deref())
    }
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `TURNSTILE_*` environment overrides (`__` separates nested keys).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig =
            serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section so misconfiguration fails at startup.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.policy.validate()?;
        if self.rate_limiting.evict_interval_ms == 0 {
            return Err(TurnstileError::InvalidPolicy(
                "evict_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.rate_limiting.shards == 0 {
            return Err(TurnstileError::Config("shards must be at least 1".to_string()));
        }
        self.identity.resolver()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RefillPolicy;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.server.http_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.rate_limiting.policy, LimiterPolicy::default());
        assert_eq!(config.rate_limiting.evict_interval(), Duration::from_secs(60));
        assert_eq!(config.rate_limiting.shards, DEFAULT_SHARDS);
        assert_eq!(config.identity.source, IdentitySource::PeerAddress);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = TurnstileConfig::from_yaml("{}").unwrap();
        assert_eq!(config.rate_limiting.evict_interval_ms, 60_000);
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:8080
rate_limiting:
  policy:
    algorithm: token_bucket
    capacity: 3
    initial_tokens: 3
    refill_rate_ms: 1000
    refill_policy: reset_on_observe
  evict_interval_ms: 5000
  shards: 8
identity:
  source: header
  header: x-api-key
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.http_addr.port(), 8080);
        assert_eq!(config.rate_limiting.evict_interval(), Duration::from_secs(5));
        assert_eq!(config.rate_limiting.shards, 8);
        assert_eq!(
            config.rate_limiting.policy,
            LimiterPolicy::TokenBucket {
                capacity: 3,
                initial_tokens: Some(3),
                refill_rate_ms: 1000,
                refill_policy: RefillPolicy::ResetOnObserve,
            }
        );
        assert_eq!(config.identity.resolver().unwrap().source(), IdentitySource::Header);
    }

    #[test]
    fn test_invalid_policy_fails_fast() {
        let yaml = r#"
rate_limiting:
  policy:
    algorithm: fixed_window
    window_ms: 1000
    limit_per_window: 0
"#;
        assert!(matches!(
            TurnstileConfig::from_yaml(yaml),
            Err(TurnstileError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_header_source_requires_name() {
        let yaml = "identity:\n  source: header\n";
        assert!(matches!(TurnstileConfig::from_yaml(yaml), Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_zero_evict_interval_rejected() {
        let yaml = "rate_limiting:\n  evict_interval_ms: 0\n";
        assert!(TurnstileConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("turnstile-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "rate_limiting:\n  policy:\n    algorithm: fixed_window\n    window_ms: 2000\n    limit_per_window: 7\n",
        )
        .unwrap();

        let config = TurnstileConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(
            config.rate_limiting.policy,
            LimiterPolicy::FixedWindow {
                window_ms: 2000,
                limit_per_window: 7
            }
        );
        assert_eq!(config.rate_limiting.shards, DEFAULT_SHARDS);
    }
}
