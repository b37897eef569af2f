//! Client identity resolution for inbound requests.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderName;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};

/// Identity used when neither the header nor the peer address is known.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Where the rate-limit identity of a request comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// The remote IP address of the connection
    #[default]
    PeerAddress,
    /// A request header such as `x-api-key`, falling back to the peer address
    Header,
}

/// Extracts the identity of a request.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    source: IdentitySource,
    header: Option<HeaderName>,
}

impl IdentityResolver {
    /// Resolve identities from the peer address.
    pub fn peer_address() -> Self {
        Self {
            source: IdentitySource::PeerAddress,
            header: None,
        }
    }

    /// Resolve identities from the header `name`.
    pub fn header(name: &str) -> Result<Self> {
        let header = HeaderName::try_from(name)
            .map_err(|e| TurnstileError::Config(format!("Invalid identity header '{}': {}", name, e)))?;
        Ok(Self {
            source: IdentitySource::Header,
            header: Some(header),
        })
    }

    /// Build a resolver from configuration.
    pub fn from_source(source: IdentitySource, header: Option<&str>) -> Result<Self> {
        match (source, header) {
            (IdentitySource::PeerAddress, _) => Ok(Self::peer_address()),
            (IdentitySource::Header, Some(name)) => Self::header(name),
            (IdentitySource::Header, None) => Err(TurnstileError::Config(
                "identity source 'header' requires a header name".to_string(),
            )),
        }
    }

    /// Get the configured source.
    pub fn source(&self) -> IdentitySource {
        self.source
    }

    /// Resolve the identity of `request`.
    pub fn resolve<B>(&self, request: &Request<B>) -> String {
        if let Some(header) = &self.header {
            let value = request
                .headers()
                .get(header)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(value) = value {
                return value.to_string();
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::peer_address()
    }
}
