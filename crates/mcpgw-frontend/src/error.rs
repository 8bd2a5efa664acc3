//! HTTP-layer errors (spec §4.L, §7): these are rejected before the request
//! ever reaches JSON-RPC dispatch, so they carry their own status codes
//! instead of a JSON-RPC error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error("missing Mcp-Session-Id header or session_id query parameter")]
    MissingSessionId,

    #[error("session not found")]
    SessionNotFound,

    #[error("session does not belong to the authenticated caller")]
    WrongOwner,

    #[error("malformed JSON-RPC request body: {0}")]
    MalformedBody(String),

    #[error("unable to establish caller identity: {0}")]
    Unauthenticated(String),
}

impl FrontendError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingSessionId | Self::MalformedBody(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::WrongOwner => StatusCode::FORBIDDEN,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for FrontendError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, self.to_string()).into_response()
    }
}
