//! Reserved env-config keys consumed by the HTTP client configuration
//! rather than forwarded as headers (spec §4.I, §6). A closed enum rather
//! than raw string matching, so `TIMEOUT`'s duration parsing has one call
//! site (SPEC_FULL.md §C).

use std::time::Duration;

use crate::error::{CredentialError, CredentialResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservedKey {
    AuthToken,
    AuthHeader,
    BaseUrl,
    Timeout,
}

impl ReservedKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthToken => "AUTH_TOKEN",
            Self::AuthHeader => "AUTH_HEADER",
            Self::BaseUrl => "BASE_URL",
            Self::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "AUTH_TOKEN" => Some(Self::AuthToken),
            "AUTH_HEADER" => Some(Self::AuthHeader),
            "BASE_URL" => Some(Self::BaseUrl),
            "TIMEOUT" => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// Parse `TIMEOUT`'s human-readable duration ("30s", "2m", ...).
pub fn parse_timeout(value: &str) -> CredentialResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| CredentialError::InvalidTimeout(format!("{value}: {e}")))
}

/// Non-reserved keys become request headers prefixed `X-Env-` (spec §4.I).
pub fn env_header_name(key: &str) -> String {
    format!("X-Env-{key}")
}
