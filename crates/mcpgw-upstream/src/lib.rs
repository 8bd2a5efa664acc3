//! The uniform upstream MCP client contract and its two concrete, owned
//! transports: streamable HTTP (with event-stream fallback) and
//! line-delimited JSON-RPC over a child process's stdio (spec §4.B–§4.D).
//!
//! The container-instance transport (§4.E) has no client code of its own
//! here: `mcpgw-instances` ensures the remote pod is ready, then builds an
//! [`http::HttpUpstreamClient`] against its cluster-local address.

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod pending;
pub mod process;

pub use auth::UpstreamAuth;
pub use client::{Page, UpstreamClient, DEFAULT_REQUEST_TIMEOUT};
pub use error::{UpstreamError, UpstreamResult};
pub use http::{HttpUpstreamClient, HttpUpstreamConfig};
pub use process::{ProcessUpstreamClient, ProcessUpstreamConfig};
