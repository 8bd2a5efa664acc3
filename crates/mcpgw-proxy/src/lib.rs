//! The proxy engine (spec §4.K): initialize fan-out, listing fan-out with
//! per-item authorization, invocation routing across namespaced display
//! names, and raw forwarding for methods the gateway doesn't specifically
//! handle. This crate is the one place that holds the authorizer, the
//! credential resolver, the instance managers, and the session's client map
//! all at once — every other crate only sees one or two of them.

mod client_factory;
mod engine;
mod error;

pub use client_factory::{ClientFactory, ClientFactoryConfig};
pub use engine::{ProxyEngine, ProxyEngineConfig};
pub use error::{ProxyError, ProxyResult};
