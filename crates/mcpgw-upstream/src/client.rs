//! The uniform upstream client contract (spec §4.B).
//!
//! Every transport — HTTP, child-process, or the container-instance client
//! that delegates into the HTTP client once its pod is ready — implements
//! this trait. The proxy engine never inspects which concrete transport it
//! is holding.

use async_trait::async_trait;
use mcpgw_wire::{InitializeParams, InitializeResult, ServerCapabilities, ServerInfo};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::UpstreamResult;

/// Default per-request wall-clock timeout (spec §4.B), used unless a
/// shorter deadline is implied by the caller's cancellation token.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync + std::fmt::Debug {
    async fn initialize(
        &self,
        ct: CancellationToken,
        params: InitializeParams,
    ) -> UpstreamResult<InitializeResult>;

    async fn list_tools(
        &self,
        ct: CancellationToken,
        cursor: Option<String>,
    ) -> UpstreamResult<Page<mcpgw_wire::ToolDescriptor>>;

    async fn call_tool(
        &self,
        ct: CancellationToken,
        name: &str,
        arguments: Value,
    ) -> UpstreamResult<Value>;

    async fn list_resources(
        &self,
        ct: CancellationToken,
        cursor: Option<String>,
    ) -> UpstreamResult<Page<mcpgw_wire::ResourceDescriptor>>;

    async fn read_resource(&self, ct: CancellationToken, uri: &str) -> UpstreamResult<Value>;

    async fn list_prompts(
        &self,
        ct: CancellationToken,
        cursor: Option<String>,
    ) -> UpstreamResult<Page<mcpgw_wire::PromptDescriptor>>;

    async fn get_prompt(
        &self,
        ct: CancellationToken,
        name: &str,
        arguments: Option<Value>,
    ) -> UpstreamResult<Value>;

    /// Forward an arbitrary request verbatim and return its response. Used
    /// for the proxy engine's raw-passthrough path (spec §4.K).
    async fn send_raw(
        &self,
        ct: CancellationToken,
        request: mcpgw_wire::JsonRpcRequest,
    ) -> UpstreamResult<mcpgw_wire::JsonRpcResponse>;

    fn is_initialized(&self) -> bool;

    fn capabilities(&self) -> Option<ServerCapabilities>;

    fn server_info(&self) -> Option<ServerInfo>;

    async fn close(&self) -> UpstreamResult<()>;
}
