//! Errors from env/credential resolution and blob encryption (spec §7).

use mcpgw_wire::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed: ciphertext invalid, truncated, or tampered")]
    DecryptFailed,

    #[error("malformed encrypted blob: {0}")]
    MalformedBlob(String),

    #[error("failed to load env config: {0}")]
    LoadFailed(String),

    #[error("invalid TIMEOUT value: {0}")]
    InvalidTimeout(String),
}

impl CredentialError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidKey(_) => ErrorCategory::Configuration,
            Self::EncryptFailed | Self::DecryptFailed | Self::MalformedBlob(_) => {
                ErrorCategory::Internal
            }
            Self::LoadFailed(_) => ErrorCategory::Transport,
            Self::InvalidTimeout(_) => ErrorCategory::Configuration,
        }
    }
}

pub type CredentialResult<T> = Result<T, CredentialError>;
