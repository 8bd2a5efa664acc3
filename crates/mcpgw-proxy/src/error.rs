//! Proxy-engine errors (spec §4.K, §7).

use mcpgw_wire::{ErrorCategory, JsonRpcError};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("target {0} is not connected in this session")]
    TargetNotConnected(String),

    #[error("access denied")]
    AuthorizationDenied,

    #[error("session is uninitialized — please re-initialize")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("no target initialized successfully: {0}")]
    AggregateInitFailure(String),

    #[error(transparent)]
    Upstream(#[from] mcpgw_upstream::UpstreamError),

    #[error(transparent)]
    Authz(#[from] mcpgw_authz::AuthzError),

    #[error(transparent)]
    Credential(#[from] mcpgw_credentials::CredentialError),

    #[error(transparent)]
    Instance(#[from] mcpgw_instances::InstanceError),

    #[error(transparent)]
    Repository(#[from] mcpgw_repository::RepositoryError),

    #[error(transparent)]
    Session(#[from] mcpgw_session::SessionError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::TargetNotConnected(_) => ErrorCategory::NotFound,
            Self::AuthorizationDenied => ErrorCategory::AuthorizationDenied,
            Self::NotInitialized => ErrorCategory::InvalidRequest,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::AggregateInitFailure(_) => ErrorCategory::Transport,
            Self::Upstream(e) => e.category(),
            Self::Authz(e) => e.category(),
            Self::Credential(e) => e.category(),
            Self::Instance(e) => e.category(),
            Self::Repository(e) => e.category(),
            Self::Session(e) => e.category(),
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Render as the JSON-RPC error object the frontend embeds in a
    /// response envelope (spec §7 "explicit error code + message on every
    /// failure").
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError::new(self.category().jsonrpc_code().code(), self.to_string())
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
