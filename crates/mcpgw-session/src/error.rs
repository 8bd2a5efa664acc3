//! Session-manager errors (spec §4.J, §7).

use mcpgw_wire::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(String),

    #[error("session is uninitialized — please re-initialize")]
    NotInitialized,

    #[error("target {0} is not connected in this session")]
    TargetNotConnected(String),

    #[error("repository error: {0}")]
    Repository(#[from] mcpgw_repository::RepositoryError),
}

impl SessionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::NotInitialized => ErrorCategory::InvalidRequest,
            Self::TargetNotConnected(_) => ErrorCategory::NotFound,
            Self::Repository(e) => e.category(),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
