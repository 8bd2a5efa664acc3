//! Errors from policy loading and evaluation (spec §7).

use mcpgw_wire::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    #[error("failed to load policies: {0}")]
    LoadFailed(String),
}

impl AuthzError {
    /// Policy cache loads treat read errors as transient: the request
    /// fails, but the cache itself is not poisoned (spec §7).
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Transport
    }
}

pub type AuthzResult<T> = Result<T, AuthzError>;
