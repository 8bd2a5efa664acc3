//! Repository-level errors (spec §6): every typed operation distinguishes
//! `NotFound` from `AlreadyExists` so callers can react without string
//! matching.

use mcpgw_wire::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("repository backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } => ErrorCategory::InvalidRequest,
            Self::Backend(_) => ErrorCategory::Transport,
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
