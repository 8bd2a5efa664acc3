//! In-memory per-client-connection session state (spec §3 Session, §4.J).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mcpgw_upstream::UpstreamClient;
use mcpgw_wire::{Identity, ResourceKind, ServerCapabilities};
use tokio::sync::RwLock;

/// A client handle held by a session. `owned` distinguishes HTTP-like
/// clients (the session may close them) from process/container clients
/// (owned by their respective managers — a session must never close
/// these, spec §3 Ownership).
#[derive(Clone)]
pub struct UpstreamHandle {
    pub client: Arc<dyn UpstreamClient>,
    pub owned: bool,
}

/// One entry in a namespace map: the display name a client sees resolves
/// back to which target and which underlying name (spec §3 Session,
/// §4.K listing fan-out / invocation routing).
#[derive(Debug, Clone)]
pub struct NamespaceEntry {
    pub target_id: String,
    pub target_name: String,
    pub underlying_name: String,
}

pub struct Session {
    pub id: String,
    pub owner_user_id: String,
    pub role: RwLock<String>,
    pub groups: RwLock<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: RwLock<DateTime<Utc>>,
    pub initialized: RwLock<bool>,
    pub capabilities: RwLock<ServerCapabilities>,
    pub clients: RwLock<HashMap<String, UpstreamHandle>>,
    pub target_ids: RwLock<HashMap<String, String>>,
    pub tools: RwLock<HashMap<String, NamespaceEntry>>,
    pub resources: RwLock<HashMap<String, NamespaceEntry>>,
    pub prompts: RwLock<HashMap<String, NamespaceEntry>>,
}

impl Session {
    pub fn new(id: String, identity: &Identity, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_user_id: identity.user_id.clone(),
            role: RwLock::new(identity.role.clone()),
            groups: RwLock::new(identity.groups.clone()),
            created_at,
            expires_at: RwLock::new(expires_at),
            initialized: RwLock::new(false),
            capabilities: RwLock::new(ServerCapabilities::default()),
            clients: RwLock::new(HashMap::new()),
            target_ids: RwLock::new(HashMap::new()),
            tools: RwLock::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
            prompts: RwLock::new(HashMap::new()),
        }
    }

    pub async fn identity(&self) -> Identity {
        Identity {
            user_id: self.owner_user_id.clone(),
            role: self.role.read().await.clone(),
            groups: self.groups.read().await.clone(),
        }
    }

    pub fn namespace_map(&self, kind: ResourceKind) -> &RwLock<HashMap<String, NamespaceEntry>> {
        match kind {
            ResourceKind::Tool => &self.tools,
            ResourceKind::Resource => &self.resources,
            ResourceKind::Prompt => &self.prompts,
            ResourceKind::All => panic!("ResourceKind::All has no namespace map"),
        }
    }

    /// Close every owned (HTTP-like) client and drop all client/namespace
    /// state, without touching process/container clients (spec §3
    /// Ownership, §4.J delete/recycle).
    pub async fn close_owned_clients(&self) {
        let handles: Vec<UpstreamHandle> = self.clients.read().await.values().cloned().collect();
        for handle in handles {
            if handle.owned {
                if let Err(err) = handle.client.close().await {
                    tracing::warn!(session_id = %self.id, error = %err, "error closing upstream client");
                }
            }
        }
    }

    pub async fn clear_state(&self) {
        self.clients.write().await.clear();
        self.target_ids.write().await.clear();
        self.tools.write().await.clear();
        self.resources.write().await.clear();
        self.prompts.write().await.clear();
        *self.capabilities.write().await = ServerCapabilities::default();
        *self.initialized.write().await = false;
    }
}
