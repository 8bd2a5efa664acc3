//! Error type for upstream client operations (spec §4.B, §7).

use mcpgw_wire::ErrorCategory;
use std::time::Duration;
use thiserror::Error;

/// Failure modes of an upstream operation. Every variant maps onto one of
/// the taxonomy categories in `mcpgw_wire::ErrorCategory` via [`category`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpstreamError {
    #[error("transport is dead: {0}")]
    TransportDead(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream returned a JSON-RPC error {code}: {message}")]
    Upstream { code: i32, message: String },

    #[error("failed to (de)serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl UpstreamError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TransportDead(_) | Self::ConnectionFailed(_) | Self::Timeout(_) => {
                ErrorCategory::Transport
            }
            Self::Upstream { .. } => ErrorCategory::UpstreamError,
            Self::Serialization(_) | Self::Protocol(_) | Self::Cancelled => {
                ErrorCategory::Internal
            }
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    pub fn transport_dead(reason: impl Into<String>) -> Self {
        Self::TransportDead(reason.into())
    }

    pub fn upstream(code: i32, message: impl Into<String>) -> Self {
        Self::Upstream {
            code,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(Duration::from_secs(60))
        } else {
            Self::ConnectionFailed(err.to_string())
        }
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;
