//! The HTTP-facing MCP session endpoint (spec §4.L): one logical endpoint
//! exposing request/notification-stream/termination verbs over the three
//! HTTP methods, terminating the client side of the MCP session the way
//! `mcpgw-proxy` terminates the upstream side.

mod error;
mod hub;
mod identity;
mod router;

pub use error::FrontendError;
pub use hub::NotificationHub;
pub use identity::IdentityProvider;
pub use router::{router, AppState, SessionQuery, SESSION_ID_HEADER};
