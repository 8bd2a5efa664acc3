//! Caller identity resolution. The authentication middleware that actually
//! verifies a caller and produces an [`Identity`] is an external
//! collaborator (spec §1 Out of scope); this crate only defines the seam it
//! plugs into.

use async_trait::async_trait;
use axum::http::HeaderMap;
use mcpgw_wire::Identity;

use crate::error::FrontendError;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn identify(&self, headers: &HeaderMap) -> Result<Identity, FrontendError>;
}
