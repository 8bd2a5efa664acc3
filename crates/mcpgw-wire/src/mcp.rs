//! MCP-level types layered on top of the JSON-RPC envelope: capability
//! records, tool/resource/prompt descriptors, and the initialize handshake.
//!
//! Tool/resource/prompt content payloads are carried as raw JSON and never
//! reshaped by the gateway — only the envelope around them is typed here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// The MCP protocol version this gateway negotiates during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Capabilities a single upstream (or the aggregated session) advertises.
/// Booleans OR-merge across a fan-out: if any upstream sets a flag, the
/// aggregate sets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

impl ServerCapabilities {
    /// Fold another upstream's capabilities into this aggregate. Used under
    /// the fan-out mutex in the proxy engine (§4.K).
    pub fn merge(&mut self, other: &ServerCapabilities) {
        if let Some(other_tools) = &other.tools {
            let entry = self.tools.get_or_insert_with(ToolsCapability::default);
            entry.list_changed = entry.list_changed || other_tools.list_changed;
        }
        if let Some(other_resources) = &other.resources {
            let entry = self.resources.get_or_insert_with(ResourcesCapability::default);
            entry.subscribe = entry.subscribe || other_resources.subscribe;
            entry.list_changed = entry.list_changed || other_resources.list_changed;
        }
        if let Some(other_prompts) = &other.prompts {
            let entry = self.prompts.get_or_insert_with(PromptsCapability::default);
            entry.list_changed = entry.list_changed || other_prompts.list_changed;
        }
        if other.logging.is_some() && self.logging.is_none() {
            self.logging = Some(Value::Object(Default::default()));
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesCapability {
    #[serde(default)]
    pub subscribe: bool,
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptsCapability {
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

/// `serverInfo` returned from an upstream (or synthesized by the gateway
/// itself for the aggregated session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(rename = "clientInfo")]
    pub client_info: ServerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A tool descriptor as returned by `tools/list`. `input_schema` and any
/// other fields travel as raw JSON; the gateway only reads `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

/// The three kinds of namespaced resource the proxy aggregates, mirrored in
/// authorization queries (§4.H) and the session's namespace maps (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    All,
    Tool,
    Resource,
    Prompt,
}

impl ResourceKind {
    /// `all` matches any query kind; used by policy evaluation (§4.H.2).
    pub fn matches(self, query: ResourceKind) -> bool {
        self == ResourceKind::All || self == query
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
        };
        f.write_str(s)
    }
}

/// A tool-call result, which distinguishes protocol errors from
/// application-level tool failures via `is_error` (§7: authorization and
/// routing failures on `call-tool` become `isError: true` results, not
/// transport-level errors).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<Value>,
    #[serde(default, rename = "isError", skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    pub fn error_text(message: impl Into<String>) -> Self {
        Self {
            content: vec![serde_json::json!({ "type": "text", "text": message.into() })],
            is_error: true,
        }
    }
}

/// Identity snapshot passed into the core by the surrounding authentication
/// layer (§3 Identity). Immutable once captured into a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: String,
    pub groups: Vec<String>,
}

impl Identity {
    /// Order-independent group-set comparison, used by `needs-recycle` (§4.J).
    pub fn same_groups(&self, other: &Identity) -> bool {
        let a: BTreeSet<&str> = self.groups.iter().map(String::as_str).collect();
        let b: BTreeSet<&str> = other.groups.iter().map(String::as_str).collect();
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_merge_is_or() {
        let mut agg = ServerCapabilities::default();
        agg.merge(&ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: false }),
            ..Default::default()
        });
        agg.merge(&ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: true }),
            ..Default::default()
        });
        assert!(agg.tools.unwrap().list_changed);
    }

    #[test]
    fn resource_kind_all_matches_everything() {
        assert!(ResourceKind::All.matches(ResourceKind::Tool));
        assert!(ResourceKind::All.matches(ResourceKind::Resource));
        assert!(!ResourceKind::Tool.matches(ResourceKind::Resource));
    }

    #[test]
    fn same_groups_is_order_independent() {
        let a = Identity { user_id: "u".into(), role: "r".into(), groups: vec!["x".into(), "y".into()] };
        let b = Identity { user_id: "u".into(), role: "r".into(), groups: vec!["y".into(), "x".into()] };
        assert!(a.same_groups(&b));
        let c = Identity { user_id: "u".into(), role: "r".into(), groups: vec!["x".into()] };
        assert!(!a.same_groups(&c));
    }
}
