//! Wire-level types for the MCP multiplexing gateway: JSON-RPC 2.0
//! envelopes, MCP capability/tool/resource/prompt records, and the shared
//! error taxonomy. Nothing in this crate talks to a network or a process —
//! it is pure data plus the (de)serialization rules the rest of the
//! workspace builds on.

pub mod error;
pub mod jsonrpc;
pub mod mcp;

pub use error::ErrorCategory;
pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcResponsePayload, RequestId, JSONRPC_VERSION,
};
pub use mcp::{
    Identity, InitializeParams, InitializeResult, PromptDescriptor, PromptsCapability,
    ResourceDescriptor, ResourceKind, ResourcesCapability, ServerCapabilities, ServerInfo,
    ToolCallResult, ToolDescriptor, ToolsCapability, MCP_PROTOCOL_VERSION,
};
