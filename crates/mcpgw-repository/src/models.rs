//! Persisted data-model entities the repository trait reads and writes
//! (spec §3, §6). These are storage records, distinct from the in-memory
//! runtime state `mcpgw-session`/`mcpgw-instances` build from them.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    EventStream,
    Process,
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statefulness {
    Stateless,
    Stateful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationBoundary {
    Shared,
    PerRole,
    PerGroup,
    PerUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    None,
    Bearer,
    NamedHeader,
}

/// A configured upstream (spec §3 Target). Invariants enforced by the
/// repository on write, not by this struct: name uniqueness and
/// transport-required-field presence belong to the out-of-scope backing
/// store, so they are documented here rather than checked in-process.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub transport: TransportKind,
    pub http_address: Option<String>,
    pub process_command: Option<String>,
    pub process_args: Vec<String>,
    pub container_image: Option<String>,
    pub container_port: Option<u16>,
    pub container_health_probe_path: Option<String>,
    pub container_command: Option<String>,
    pub container_args: Vec<String>,
    pub statefulness: Statefulness,
    pub isolation: IsolationBoundary,
    pub auth_kind: AuthKind,
    pub auth_header_name: Option<String>,
    pub enabled: bool,
    pub default_credential: Option<String>,
}

/// A user account as the repository sees it (username/role/group
/// membership; password/API-token material lives in separate tables per
/// spec §6 and is intentionally not modeled here since no crate in this
/// workspace consumes it directly).
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ApiToken {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub owner_user_id: String,
    pub role: String,
    pub groups: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceKind {
    Process,
    Container,
}

#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub subject_key: String,
    pub target_id: String,
    pub kind: InstanceKind,
    pub started_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RequestLog {
    pub id: String,
    pub session_id: Option<String>,
    pub target_id: Option<String>,
    pub method: String,
    pub succeeded: bool,
    pub error_category: Option<String>,
    pub logged_at: DateTime<Utc>,
}
