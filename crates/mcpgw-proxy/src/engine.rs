//! Session-scoped fan-out and routing (spec §4.K): the core operations a
//! frontend calls once it has a session in hand.

use std::sync::Arc;

use futures::future::join_all;
use mcpgw_authz::{Authorizer, PolicySource};
use mcpgw_credentials::EnvConfigSource;
use mcpgw_repository::{Target, TargetRepository};
use mcpgw_session::{NamespaceEntry, Session, UpstreamHandle};
use mcpgw_wire::{
    Identity, InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse, ResourceKind,
    ServerCapabilities, ServerInfo, ToolCallResult, MCP_PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::client_factory::ClientFactory;
use crate::error::{ProxyError, ProxyResult};

#[derive(Debug, Clone)]
pub struct ProxyEngineConfig {
    pub server_name: String,
    pub server_version: String,
}

impl Default for ProxyEngineConfig {
    fn default() -> Self {
        Self {
            server_name: "mcpgw".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub struct ProxyEngine<P, E, T>
where
    P: PolicySource + Send + Sync,
    E: EnvConfigSource + Send + Sync,
    T: TargetRepository + Send + Sync,
{
    config: ProxyEngineConfig,
    authorizer: Arc<Authorizer<P>>,
    factory: Arc<ClientFactory<E>>,
    targets: Arc<T>,
}

/// Outcome of initializing a single target, folded into the session by the
/// caller under its own locking.
enum TargetInitOutcome {
    Connected {
        target: Target,
        handle: UpstreamHandle,
        capabilities: ServerCapabilities,
    },
    Denied,
    Failed { target_name: String, error: String },
}

impl<P, E, T> ProxyEngine<P, E, T>
where
    P: PolicySource + Send + Sync,
    E: EnvConfigSource + Send + Sync,
    T: TargetRepository + Send + Sync,
{
    pub fn new(
        config: ProxyEngineConfig,
        authorizer: Arc<Authorizer<P>>,
        factory: Arc<ClientFactory<E>>,
        targets: Arc<T>,
    ) -> Self {
        Self {
            config,
            authorizer,
            factory,
            targets,
        }
    }

    async fn init_one_target(
        &self,
        ct: CancellationToken,
        target: Target,
        identity: Identity,
    ) -> TargetInitOutcome {
        let allowed = match self
            .authorizer
            .can_access(
                &identity.user_id,
                &identity.role,
                &identity.groups,
                Some(&target.id),
                ResourceKind::All,
                "*",
            )
            .await
        {
            Ok(decision) => decision.allowed,
            Err(err) => {
                tracing::warn!(target = %target.name, error = %err, "authorization check failed during initialize fan-out");
                false
            }
        };
        if !allowed {
            return TargetInitOutcome::Denied;
        }

        let (client, owned) = match self.factory.build(&target, &identity).await {
            Ok(pair) => pair,
            Err(err) => {
                return TargetInitOutcome::Failed {
                    target_name: target.name.clone(),
                    error: err.to_string(),
                }
            }
        };

        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
        };
        match client.initialize(ct, params).await {
            Ok(result) => TargetInitOutcome::Connected {
                target,
                handle: UpstreamHandle { client, owned },
                capabilities: result.capabilities,
            },
            Err(err) => TargetInitOutcome::Failed {
                target_name: target.name.clone(),
                error: err.to_string(),
            },
        }
    }

    /// Fan out `initialize` to every enabled, authorized target (spec
    /// §4.K Initialize fan-out).
    pub async fn initialize_session(
        &self,
        ct: CancellationToken,
        session: &Session,
        identity: &Identity,
    ) -> ProxyResult<InitializeResult> {
        let targets = self.targets.list_targets(true).await?;

        if targets.is_empty() {
            *session.capabilities.write().await = ServerCapabilities::default();
            *session.initialized.write().await = true;
            return Ok(self.aggregate_result(
                ServerCapabilities::default(),
                Some("No upstream targets are configured.".to_string()),
            ));
        }

        let outcomes = join_all(
            targets
                .into_iter()
                .map(|target| self.init_one_target(ct.clone(), target, identity.clone())),
        )
        .await;

        let mut aggregated_caps = ServerCapabilities::default();
        let mut connected = 0usize;
        let mut failures = Vec::new();

        for outcome in outcomes {
            match outcome {
                TargetInitOutcome::Denied => {}
                TargetInitOutcome::Failed { target_name, error } => {
                    tracing::warn!(target = %target_name, error = %error, "target failed to initialize");
                    failures.push(format!("{target_name}: {error}"));
                }
                TargetInitOutcome::Connected {
                    target,
                    handle,
                    capabilities,
                } => {
                    aggregated_caps.merge(&capabilities);
                    session
                        .clients
                        .write()
                        .await
                        .insert(target.name.clone(), handle);
                    session
                        .target_ids
                        .write()
                        .await
                        .insert(target.name.clone(), target.id.clone());
                    connected += 1;
                }
            }
        }

        if connected == 0 {
            if failures.is_empty() {
                *session.capabilities.write().await = ServerCapabilities::default();
                *session.initialized.write().await = true;
                return Ok(self.aggregate_result(
                    ServerCapabilities::default(),
                    Some("No targets are authorized for this identity.".to_string()),
                ));
            }
            return Err(ProxyError::AggregateInitFailure(failures.join("; ")));
        }

        *session.capabilities.write().await = aggregated_caps.clone();
        *session.initialized.write().await = true;
        Ok(self.aggregate_result(aggregated_caps, None))
    }

    fn aggregate_result(
        &self,
        capabilities: ServerCapabilities,
        instructions: Option<String>,
    ) -> InitializeResult {
        InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities,
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
            instructions,
        }
    }

    async fn connected_client_names(&self, session: &Session) -> Vec<String> {
        let mut names: Vec<String> = session.clients.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of connected clients to fan a listing call out to: (target
    /// name, target id, client, whether a display-name prefix is needed).
    async fn connected_clients_for_listing(
        &self,
        session: &Session,
    ) -> (Vec<(String, String, Arc<dyn mcpgw_upstream::UpstreamClient>)>, bool) {
        let target_ids = session.target_ids.read().await;
        let clients: Vec<(String, String, Arc<dyn mcpgw_upstream::UpstreamClient>)> = session
            .clients
            .read()
            .await
            .iter()
            .map(|(name, handle)| {
                (
                    name.clone(),
                    target_ids.get(name).cloned().unwrap_or_default(),
                    handle.client.clone(),
                )
            })
            .collect();
        let prefix_needed = clients.len() > 1;
        (clients, prefix_needed)
    }

    /// Authorize one listed item and, if allowed, record its namespace
    /// mapping and return the display-named JSON copy (spec §4.K Listing
    /// fan-out).
    async fn authorize_and_namespace(
        &self,
        session: &Session,
        identity: &Identity,
        kind: ResourceKind,
        target_name: &str,
        target_id: &str,
        underlying: String,
        prefix_needed: bool,
        mut json_item: Value,
    ) -> ProxyResult<Option<Value>> {
        let decision = self
            .authorizer
            .can_access(
                &identity.user_id,
                &identity.role,
                &identity.groups,
                Some(target_id),
                kind,
                &underlying,
            )
            .await?;
        if !decision.allowed {
            return Ok(None);
        }
        let display_name = if prefix_needed {
            format!("{target_name}_{underlying}")
        } else {
            underlying.clone()
        };
        session.namespace_map(kind).write().await.insert(
            display_name.clone(),
            NamespaceEntry {
                target_id: target_id.to_string(),
                target_name: target_name.to_string(),
                underlying_name: underlying,
            },
        );
        if let Some(obj) = json_item.as_object_mut() {
            obj.insert("name".to_string(), Value::String(display_name));
        }
        Ok(Some(json_item))
    }

    pub async fn list_tools(
        &self,
        ct: CancellationToken,
        session: &Session,
        identity: &Identity,
    ) -> ProxyResult<Vec<Value>> {
        if !*session.initialized.read().await {
            return Err(ProxyError::NotInitialized);
        }
        session.namespace_map(ResourceKind::Tool).write().await.clear();

        let (clients, prefix_needed) = self.connected_clients_for_listing(session).await;
        let per_target = join_all(clients.into_iter().map(|(target_name, target_id, client)| {
            let ct = ct.clone();
            async move {
                let result = client.list_tools(ct, None).await;
                (target_name, target_id, result)
            }
        }))
        .await;

        let mut aggregated = Vec::new();
        for (target_name, target_id, result) in per_target {
            let items = match result {
                Ok(page) => page.items,
                Err(err) => {
                    tracing::warn!(target = %target_name, error = %err, "listing tools failed for one target during fan-out");
                    continue;
                }
            };
            for item in items {
                let underlying = item.name.clone();
                let json_item = serde_json::to_value(&item).map_err(|e| ProxyError::Internal(e.to_string()))?;
                if let Some(named) = self
                    .authorize_and_namespace(session, identity, ResourceKind::Tool, &target_name, &target_id, underlying, prefix_needed, json_item)
                    .await?
                {
                    aggregated.push(named);
                }
            }
        }
        Ok(aggregated)
    }

    pub async fn list_resources(
        &self,
        ct: CancellationToken,
        session: &Session,
        identity: &Identity,
    ) -> ProxyResult<Vec<Value>> {
        if !*session.initialized.read().await {
            return Err(ProxyError::NotInitialized);
        }
        session.namespace_map(ResourceKind::Resource).write().await.clear();

        let (clients, prefix_needed) = self.connected_clients_for_listing(session).await;
        let per_target = join_all(clients.into_iter().map(|(target_name, target_id, client)| {
            let ct = ct.clone();
            async move {
                let result = client.list_resources(ct, None).await;
                (target_name, target_id, result)
            }
        }))
        .await;

        let mut aggregated = Vec::new();
        for (target_name, target_id, result) in per_target {
            let items = match result {
                Ok(page) => page.items,
                Err(err) => {
                    tracing::warn!(target = %target_name, error = %err, "listing resources failed for one target during fan-out");
                    continue;
                }
            };
            for item in items {
                let underlying = item.uri.clone();
                let json_item = serde_json::to_value(&item).map_err(|e| ProxyError::Internal(e.to_string()))?;
                if let Some(named) = self
                    .authorize_and_namespace(session, identity, ResourceKind::Resource, &target_name, &target_id, underlying, prefix_needed, json_item)
                    .await?
                {
                    aggregated.push(named);
                }
            }
        }
        Ok(aggregated)
    }

    pub async fn list_prompts(
        &self,
        ct: CancellationToken,
        session: &Session,
        identity: &Identity,
    ) -> ProxyResult<Vec<Value>> {
        if !*session.initialized.read().await {
            return Err(ProxyError::NotInitialized);
        }
        session.namespace_map(ResourceKind::Prompt).write().await.clear();

        let (clients, prefix_needed) = self.connected_clients_for_listing(session).await;
        let per_target = join_all(clients.into_iter().map(|(target_name, target_id, client)| {
            let ct = ct.clone();
            async move {
                let result = client.list_prompts(ct, None).await;
                (target_name, target_id, result)
            }
        }))
        .await;

        let mut aggregated = Vec::new();
        for (target_name, target_id, result) in per_target {
            let items = match result {
                Ok(page) => page.items,
                Err(err) => {
                    tracing::warn!(target = %target_name, error = %err, "listing prompts failed for one target during fan-out");
                    continue;
                }
            };
            for item in items {
                let underlying = item.name.clone();
                let json_item = serde_json::to_value(&item).map_err(|e| ProxyError::Internal(e.to_string()))?;
                if let Some(named) = self
                    .authorize_and_namespace(session, identity, ResourceKind::Prompt, &target_name, &target_id, underlying, prefix_needed, json_item)
                    .await?
                {
                    aggregated.push(named);
                }
            }
        }
        Ok(aggregated)
    }

    /// Resolve a display name into (target name, target id, underlying
    /// name, client), re-checking authorization (spec §4.K Invocation
    /// routing).
    async fn resolve_target(
        &self,
        session: &Session,
        identity: &Identity,
        kind: ResourceKind,
        display_name: &str,
    ) -> ProxyResult<(String, Arc<dyn mcpgw_upstream::UpstreamClient>, String)> {
        let entry = session
            .namespace_map(kind)
            .read()
            .await
            .get(display_name)
            .cloned();

        let (target_name, target_id, underlying_name) = match entry {
            Some(e) => (e.target_name, e.target_id, e.underlying_name),
            None => {
                let names = self.connected_client_names(session).await;
                if names.len() == 1 {
                    let target_name = names.into_iter().next().expect("len checked");
                    let target_id = session
                        .target_ids
                        .read()
                        .await
                        .get(&target_name)
                        .cloned()
                        .unwrap_or_default();
                    (target_name, target_id, display_name.to_string())
                } else if let Some((prefix, rest)) = display_name.split_once('_') {
                    if names.iter().any(|n| n == prefix) {
                        let target_id = session
                            .target_ids
                            .read()
                            .await
                            .get(prefix)
                            .cloned()
                            .unwrap_or_default();
                        (prefix.to_string(), target_id, rest.to_string())
                    } else {
                        return Err(ProxyError::NotFound(display_name.to_string()));
                    }
                } else {
                    return Err(ProxyError::NotFound(display_name.to_string()));
                }
            }
        };

        let decision = self
            .authorizer
            .can_access(
                &identity.user_id,
                &identity.role,
                &identity.groups,
                Some(&target_id),
                kind,
                &underlying_name,
            )
            .await?;
        if !decision.allowed {
            return Err(ProxyError::AuthorizationDenied);
        }

        let client = session
            .clients
            .read()
            .await
            .get(&target_name)
            .map(|h| h.client.clone())
            .ok_or_else(|| ProxyError::TargetNotConnected(target_name.clone()))?;

        Ok((target_name, client, underlying_name))
    }

    /// `call-tool` converts authorization/routing failures into a tool-call
    /// error payload rather than propagating them (spec §7).
    pub async fn call_tool(
        &self,
        ct: CancellationToken,
        session: &Session,
        identity: &Identity,
        display_name: &str,
        arguments: Option<Value>,
    ) -> ProxyResult<Value> {
        if !*session.initialized.read().await {
            return Err(ProxyError::NotInitialized);
        }
        let resolved = self
            .resolve_target(session, identity, ResourceKind::Tool, display_name)
            .await;
        let (_, client, underlying_name) = match resolved {
            Ok(t) => t,
            Err(err @ (ProxyError::NotFound(_) | ProxyError::AuthorizationDenied | ProxyError::TargetNotConnected(_))) => {
                let result = ToolCallResult::error_text(err.to_string());
                return Ok(serde_json::to_value(result).map_err(|e| ProxyError::Internal(e.to_string()))?);
            }
            Err(err) => return Err(err),
        };

        let arguments = arguments.unwrap_or_else(|| json!({}));
        let result = client.call_tool(ct, &underlying_name, arguments).await?;
        Ok(result)
    }

    pub async fn read_resource(
        &self,
        ct: CancellationToken,
        session: &Session,
        identity: &Identity,
        uri: &str,
    ) -> ProxyResult<Value> {
        if !*session.initialized.read().await {
            return Err(ProxyError::NotInitialized);
        }
        let (_, client, underlying_name) = self
            .resolve_target(session, identity, ResourceKind::Resource, uri)
            .await?;
        let result = client.read_resource(ct, &underlying_name).await?;
        Ok(result)
    }

    pub async fn get_prompt(
        &self,
        ct: CancellationToken,
        session: &Session,
        identity: &Identity,
        name: &str,
        arguments: Option<Value>,
    ) -> ProxyResult<Value> {
        if !*session.initialized.read().await {
            return Err(ProxyError::NotInitialized);
        }
        let (_, client, underlying_name) = self
            .resolve_target(session, identity, ResourceKind::Prompt, name)
            .await?;
        let result = client.get_prompt(ct, &underlying_name, arguments).await?;
        Ok(result)
    }

    /// Forward a method the gateway doesn't specifically handle to the
    /// first available (name-sorted) connected client; `ping` is answered
    /// locally (spec §4.K Raw forwarding).
    pub async fn forward_raw(
        &self,
        ct: CancellationToken,
        session: &Session,
        request: JsonRpcRequest,
    ) -> ProxyResult<JsonRpcResponse> {
        if request.method == "ping" {
            return Ok(JsonRpcResponse::success(json!({}), request.id));
        }

        let names = self.connected_client_names(session).await;
        let Some(first) = names.into_iter().next() else {
            return Err(ProxyError::TargetNotConnected("<none>".to_string()));
        };
        let client = session
            .clients
            .read()
            .await
            .get(&first)
            .map(|h| h.client.clone())
            .ok_or_else(|| ProxyError::TargetNotConnected(first.clone()))?;

        let response = client.send_raw(ct, request).await?;
        Ok(response)
    }


    /// Top-level MCP method dispatch, called by the frontend for every
    /// request that carries an id (notifications are short-circuited
    /// upstream of this call).
    pub async fn dispatch(
        &self,
        session: &Session,
        identity: &Identity,
        request: JsonRpcRequest,
        ct: CancellationToken,
    ) -> JsonRpcResponse {
        let id = request.id.clone();
        match self.dispatch_inner(session, identity, &request, ct).await {
            Ok(response) => response,
            Err(err) => JsonRpcResponse::error(err.to_jsonrpc_error(), Some(id)),
        }
    }

    async fn dispatch_inner(
        &self,
        session: &Session,
        identity: &Identity,
        request: &JsonRpcRequest,
        ct: CancellationToken,
    ) -> ProxyResult<JsonRpcResponse> {
        let id = request.id.clone();
        let value = match request.method.as_str() {
            "initialize" => {
                serde_json::to_value(self.initialize_session(ct, session, identity).await?)
                    .map_err(|e| ProxyError::Internal(e.to_string()))?
            }
            "tools/list" => json!({ "tools": self.list_tools(ct, session, identity).await? }),
            "resources/list" => json!({ "resources": self.list_resources(ct, session, identity).await? }),
            "prompts/list" => json!({ "prompts": self.list_prompts(ct, session, identity).await? }),
            "tools/call" => {
                let params = request.params.clone().unwrap_or_else(|| json!({}));
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProxyError::Internal("tools/call missing name".to_string()))?
                    .to_string();
                let arguments = params.get("arguments").cloned();
                self.call_tool(ct, session, identity, &name, arguments).await?
            }
            "resources/read" => {
                let params = request.params.clone().unwrap_or_else(|| json!({}));
                let uri = params
                    .get("uri")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProxyError::Internal("resources/read missing uri".to_string()))?
                    .to_string();
                self.read_resource(ct, session, identity, &uri).await?
            }
            "prompts/get" => {
                let params = request.params.clone().unwrap_or_else(|| json!({}));
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProxyError::Internal("prompts/get missing name".to_string()))?
                    .to_string();
                let arguments = params.get("arguments").cloned();
                self.get_prompt(ct, session, identity, &name, arguments).await?
            }
            _ => return self.forward_raw(ct, session, request.clone()).await,
        };

        Ok(JsonRpcResponse::success(value, id))
    }
}
