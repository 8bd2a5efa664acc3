//! The error taxonomy shared across every gateway crate (spec §7).
//!
//! Each crate defines its own `thiserror` enum for its own failure modes; at
//! the boundary where an error becomes visible to a caller, it is classified
//! into one of these categories, which in turn maps onto a JSON-RPC error
//! code.

use crate::jsonrpc::JsonRpcErrorCode;
use serde::{Deserialize, Serialize};

/// The eight-way error taxonomy from spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    InvalidRequest,
    NotFound,
    Transport,
    UpstreamError,
    AuthorizationDenied,
    CapacityExceeded,
    Configuration,
    Internal,
}

impl ErrorCategory {
    /// JSON-RPC code this category maps to when surfaced as a protocol
    /// error. Several categories share `InternalError`/`InvalidParams`
    /// because the JSON-RPC spec only defines five standard codes; the
    /// taxonomy is carried in the message and `data` field for callers that
    /// care about finer granularity.
    pub fn jsonrpc_code(self) -> JsonRpcErrorCode {
        match self {
            Self::InvalidRequest => JsonRpcErrorCode::InvalidRequest,
            Self::NotFound => JsonRpcErrorCode::Application(-32001),
            Self::Transport => JsonRpcErrorCode::Application(-32002),
            Self::UpstreamError => JsonRpcErrorCode::Application(-32003),
            Self::AuthorizationDenied => JsonRpcErrorCode::Application(-32004),
            Self::CapacityExceeded => JsonRpcErrorCode::Application(-32005),
            Self::Configuration => JsonRpcErrorCode::InvalidParams,
            Self::Internal => JsonRpcErrorCode::InternalError,
        }
    }

    /// HTTP status used by the frontend handler (§4.L) for errors that
    /// surface before a JSON-RPC envelope is even constructed.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::NotFound => 404,
            Self::AuthorizationDenied => 403,
            Self::CapacityExceeded => 503,
            Self::Transport | Self::UpstreamError => 502,
            Self::Configuration | Self::Internal => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_codes_map_where_required() {
        assert_eq!(ErrorCategory::InvalidRequest.jsonrpc_code().code(), -32600);
        assert_eq!(ErrorCategory::Internal.jsonrpc_code().code(), -32603);
    }

    #[test]
    fn http_statuses_are_sane() {
        assert_eq!(ErrorCategory::NotFound.http_status(), 404);
        assert_eq!(ErrorCategory::AuthorizationDenied.http_status(), 403);
    }
}
