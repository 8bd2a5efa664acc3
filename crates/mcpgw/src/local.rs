//! Local/dev-only persistence and identity seams: an in-memory
//! [`StaticRepository`] seeded from [`GatewayConfig`]'s static
//! target/policy/env-config declarations, plus thin adapters wiring it into
//! the narrower [`mcpgw_authz::PolicySource`] and
//! [`mcpgw_credentials::EnvConfigSource`] seams, and a header-based
//! [`IdentityProvider`] standing in for the out-of-scope auth middleware
//! (spec §1). None of this ships in a production deployment — a real one
//! replaces `StaticRepository` with a database-backed `Repository` and
//! `HeaderIdentityProvider` with whatever actually authenticates callers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use mcpgw_authz::{Effect, Policy, PolicySource, Subject};
use mcpgw_credentials::{EncryptedEnvEntry, EncryptionKey, EnvConfigSource, Scope};
use mcpgw_frontend::{FrontendError, IdentityProvider};
use mcpgw_repository::{
    ApiToken, ApiTokenRepository, AuthKind, EnvConfigRepository, EnvConfigRow, InstanceRecord,
    InstanceRepository, IsolationBoundary, PolicyRepository, RequestLog, RequestLogRepository,
    SessionRecord, SessionRepository, Statefulness, Target, TargetRepository, TransportKind,
    User, UserRepository,
};
use mcpgw_wire::{Identity, ResourceKind};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{
    AuthKindConfig, EnvConfigEntryConfig, GatewayConfig, IsolationConfig, PolicyConfig,
    StatefulnessConfig, TargetConfig, TransportKindConfig,
};

fn parse_resource_kind(s: &str) -> anyhow::Result<ResourceKind> {
    match s {
        "all" => Ok(ResourceKind::All),
        "tool" => Ok(ResourceKind::Tool),
        "resource" => Ok(ResourceKind::Resource),
        "prompt" => Ok(ResourceKind::Prompt),
        other => anyhow::bail!("unknown resource_kind {other:?}, expected all/tool/resource/prompt"),
    }
}

fn parse_effect(s: &str) -> anyhow::Result<Effect> {
    match s {
        "allow" => Ok(Effect::Allow),
        "deny" => Ok(Effect::Deny),
        other => anyhow::bail!("unknown effect {other:?}, expected allow/deny"),
    }
}

fn parse_subject(s: &str) -> anyhow::Result<Subject> {
    if s == "everyone" {
        return Ok(Subject::Everyone);
    }
    match s.split_once(':') {
        Some(("role", name)) => Ok(Subject::Role(name.to_string())),
        Some(("group", name)) => Ok(Subject::Group(name.to_string())),
        Some(("user", name)) => Ok(Subject::User(name.to_string())),
        _ => anyhow::bail!("unknown subject {s:?}, expected everyone/role:<x>/group:<x>/user:<x>"),
    }
}

fn parse_scope(s: &str) -> anyhow::Result<Scope> {
    match s {
        "default" => Ok(Scope::Default),
        "role" => Ok(Scope::Role),
        "group" => Ok(Scope::Group),
        "user" => Ok(Scope::User),
        other => anyhow::bail!("unknown scope {other:?}, expected default/role/group/user"),
    }
}

fn scope_to_str(scope: Scope) -> &'static str {
    match scope {
        Scope::Default => "default",
        Scope::Role => "role",
        Scope::Group => "group",
        Scope::User => "user",
    }
}

fn convert_transport(kind: TransportKindConfig) -> TransportKind {
    match kind {
        TransportKindConfig::Http => TransportKind::Http,
        TransportKindConfig::EventStream => TransportKind::EventStream,
        TransportKindConfig::Process => TransportKind::Process,
        TransportKindConfig::Container => TransportKind::Container,
    }
}

fn convert_statefulness(s: StatefulnessConfig) -> Statefulness {
    match s {
        StatefulnessConfig::Stateless => Statefulness::Stateless,
        StatefulnessConfig::Stateful => Statefulness::Stateful,
    }
}

fn convert_isolation(i: IsolationConfig) -> IsolationBoundary {
    match i {
        IsolationConfig::Shared => IsolationBoundary::Shared,
        IsolationConfig::PerRole => IsolationBoundary::PerRole,
        IsolationConfig::PerGroup => IsolationBoundary::PerGroup,
        IsolationConfig::PerUser => IsolationBoundary::PerUser,
    }
}

fn convert_auth_kind(a: AuthKindConfig) -> AuthKind {
    match a {
        AuthKindConfig::None => AuthKind::None,
        AuthKindConfig::Bearer => AuthKind::Bearer,
        AuthKindConfig::NamedHeader => AuthKind::NamedHeader,
    }
}

fn build_target(id: String, config: &TargetConfig, key: &EncryptionKey) -> anyhow::Result<Target> {
    let default_credential = config
        .default_credential
        .as_deref()
        .map(|plaintext| key.encrypt(plaintext.as_bytes()))
        .transpose()?;
    Ok(Target {
        id,
        name: config.name.clone(),
        transport: convert_transport(config.transport),
        http_address: config.http_address.clone(),
        process_command: config.process_command.clone(),
        process_args: config.process_args.clone(),
        container_image: config.container_image.clone(),
        container_port: config.container_port,
        container_health_probe_path: config.container_health_probe_path.clone(),
        container_command: config.container_command.clone(),
        container_args: config.container_args.clone(),
        statefulness: convert_statefulness(config.statefulness),
        isolation: convert_isolation(config.isolation),
        auth_kind: convert_auth_kind(config.auth_kind),
        auth_header_name: config.auth_header_name.clone(),
        enabled: config.enabled,
        default_credential,
    })
}

fn build_policy(id: String, config: &PolicyConfig, target_id: Option<String>) -> anyhow::Result<Policy> {
    let subjects = config
        .subjects
        .iter()
        .map(|s| parse_subject(s))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Policy {
        id,
        name: config.name.clone(),
        target_id,
        resource_kind: parse_resource_kind(&config.resource_kind)?,
        resource_name_regex: config.resource_name_regex.clone(),
        effect: parse_effect(&config.effect)?,
        priority: config.priority,
        enabled: config.enabled,
        subjects,
    })
}

fn build_env_row(config: &EnvConfigEntryConfig, target_id: &str, key: &EncryptionKey) -> anyhow::Result<EnvConfigRow> {
    let scope = parse_scope(&config.scope)?;
    Ok(EnvConfigRow {
        target_id: target_id.to_string(),
        scope: scope_to_str(scope).to_string(),
        scope_value: config.scope_value.clone(),
        key: config.key.clone(),
        encrypted_value: key.encrypt(config.value.as_bytes())?,
        description: config.description.clone(),
    })
}

/// In-memory implementation of the full `Repository` surface, seeded once
/// at startup from static config. Target/policy/env-config rows are
/// read-only in practice (the CRUD endpoints that would mutate them are
/// out of scope), but the mutating trait methods are still implemented
/// against the in-memory maps rather than stubbed, since sessions and
/// instances genuinely are written at runtime.
pub struct StaticRepository {
    targets: RwLock<HashMap<String, Target>>,
    target_ids_by_name: RwLock<HashMap<String, String>>,
    policies: RwLock<HashMap<String, Policy>>,
    env_rows: RwLock<Vec<EnvConfigRow>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
    instances: RwLock<HashMap<String, InstanceRecord>>,
    users: RwLock<HashMap<String, User>>,
    tokens: RwLock<HashMap<String, ApiToken>>,
}

impl StaticRepository {
    pub fn from_config(config: &GatewayConfig, key: &EncryptionKey) -> anyhow::Result<Arc<Self>> {
        let mut targets = HashMap::new();
        let mut target_ids_by_name = HashMap::new();
        for target_config in &config.targets {
            let id = Uuid::new_v4().to_string();
            target_ids_by_name.insert(target_config.name.clone(), id.clone());
            targets.insert(id.clone(), build_target(id, target_config, key)?);
        }

        let mut policies = HashMap::new();
        for policy_config in &config.policies {
            let target_id = policy_config
                .target_name
                .as_ref()
                .map(|name| {
                    target_ids_by_name.get(name).cloned().ok_or_else(|| {
                        anyhow::anyhow!("policy {:?} references unknown target {name:?}", policy_config.name)
                    })
                })
                .transpose()?;
            let id = Uuid::new_v4().to_string();
            policies.insert(id.clone(), build_policy(id, policy_config, target_id)?);
        }

        let mut env_rows = Vec::new();
        for entry in &config.env_config {
            let target_id = target_ids_by_name.get(&entry.target_name).ok_or_else(|| {
                anyhow::anyhow!("env config entry references unknown target {:?}", entry.target_name)
            })?;
            env_rows.push(build_env_row(entry, target_id, key)?);
        }

        Ok(Arc::new(Self {
            targets: RwLock::new(targets),
            target_ids_by_name: RwLock::new(target_ids_by_name),
            policies: RwLock::new(policies),
            env_rows: RwLock::new(env_rows),
            sessions: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }))
    }
}

#[async_trait]
impl UserRepository for StaticRepository {
    async fn get_user(&self, id: &str) -> mcpgw_repository::RepositoryResult<User> {
        self.users
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| mcpgw_repository::RepositoryError::not_found("user", id))
    }

    async fn find_user_by_username(&self, username: &str) -> mcpgw_repository::RepositoryResult<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| mcpgw_repository::RepositoryError::not_found("user", username))
    }

    async fn put_user(&self, user: User) -> mcpgw_repository::RepositoryResult<()> {
        self.users.write().await.insert(user.id.clone(), user);
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> mcpgw_repository::RepositoryResult<()> {
        self.users.write().await.remove(id);
        Ok(())
    }
}

#[async_trait]
impl ApiTokenRepository for StaticRepository {
    async fn get_token(&self, id: &str) -> mcpgw_repository::RepositoryResult<ApiToken> {
        self.tokens
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| mcpgw_repository::RepositoryError::not_found("api_token", id))
    }

    async fn find_token_by_hash(&self, token_hash: &str) -> mcpgw_repository::RepositoryResult<ApiToken> {
        self.tokens
            .read()
            .await
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned()
            .ok_or_else(|| mcpgw_repository::RepositoryError::not_found("api_token", token_hash))
    }

    async fn put_token(&self, token: ApiToken) -> mcpgw_repository::RepositoryResult<()> {
        self.tokens.write().await.insert(token.id.clone(), token);
        Ok(())
    }

    async fn revoke_token(&self, id: &str) -> mcpgw_repository::RepositoryResult<()> {
        if let Some(token) = self.tokens.write().await.get_mut(id) {
            token.revoked = true;
        }
        Ok(())
    }
}

#[async_trait]
impl TargetRepository for StaticRepository {
    async fn get_target(&self, id: &str) -> mcpgw_repository::RepositoryResult<Target> {
        self.targets
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| mcpgw_repository::RepositoryError::not_found("target", id))
    }

    async fn find_target_by_name(&self, name: &str) -> mcpgw_repository::RepositoryResult<Target> {
        let id = self.target_ids_by_name.read().await.get(name).cloned();
        match id {
            Some(id) => self.get_target(&id).await,
            None => Err(mcpgw_repository::RepositoryError::not_found("target", name)),
        }
    }

    async fn list_targets(&self, only_enabled: bool) -> mcpgw_repository::RepositoryResult<Vec<Target>> {
        Ok(self
            .targets
            .read()
            .await
            .values()
            .filter(|t| !only_enabled || t.enabled)
            .cloned()
            .collect())
    }

    async fn put_target(&self, target: Target) -> mcpgw_repository::RepositoryResult<()> {
        self.target_ids_by_name
            .write()
            .await
            .insert(target.name.clone(), target.id.clone());
        self.targets.write().await.insert(target.id.clone(), target);
        Ok(())
    }

    async fn delete_target(&self, id: &str) -> mcpgw_repository::RepositoryResult<()> {
        if let Some(target) = self.targets.write().await.remove(id) {
            self.target_ids_by_name.write().await.remove(&target.name);
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyRepository for StaticRepository {
    async fn get_policy(&self, id: &str) -> mcpgw_repository::RepositoryResult<Policy> {
        self.policies
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| mcpgw_repository::RepositoryError::not_found("policy", id))
    }

    async fn list_policies(&self, target_id: Option<&str>) -> mcpgw_repository::RepositoryResult<Vec<Policy>> {
        Ok(self
            .policies
            .read()
            .await
            .values()
            .filter(|p| p.enabled && (p.target_id.is_none() || p.target_id.as_deref() == target_id))
            .cloned()
            .collect())
    }

    async fn put_policy(&self, policy: Policy) -> mcpgw_repository::RepositoryResult<()> {
        self.policies.write().await.insert(policy.id.clone(), policy);
        Ok(())
    }

    async fn delete_policy(&self, id: &str) -> mcpgw_repository::RepositoryResult<()> {
        self.policies.write().await.remove(id);
        Ok(())
    }
}

#[async_trait]
impl EnvConfigRepository for StaticRepository {
    async fn list_env_config(
        &self,
        target_id: &str,
        scope: &str,
        scope_value: Option<&str>,
    ) -> mcpgw_repository::RepositoryResult<Vec<EnvConfigRow>> {
        Ok(self
            .env_rows
            .read()
            .await
            .iter()
            .filter(|row| {
                row.target_id == target_id
                    && row.scope == scope
                    && row.scope_value.as_deref() == scope_value
            })
            .cloned()
            .collect())
    }

    async fn put_env_config(&self, row: EnvConfigRow) -> mcpgw_repository::RepositoryResult<()> {
        self.env_rows.write().await.push(row);
        Ok(())
    }

    async fn delete_env_config(
        &self,
        target_id: &str,
        scope: &str,
        scope_value: Option<&str>,
        key: &str,
    ) -> mcpgw_repository::RepositoryResult<()> {
        self.env_rows.write().await.retain(|row| {
            !(row.target_id == target_id
                && row.scope == scope
                && row.scope_value.as_deref() == scope_value
                && row.key == key)
        });
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for StaticRepository {
    async fn get_session(&self, id: &str) -> mcpgw_repository::RepositoryResult<SessionRecord> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| mcpgw_repository::RepositoryError::not_found("session", id))
    }

    async fn put_session(&self, session: SessionRecord) -> mcpgw_repository::RepositoryResult<()> {
        self.sessions.write().await.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> mcpgw_repository::RepositoryResult<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn list_sessions_for_user(&self, user_id: &str) -> mcpgw_repository::RepositoryResult<Vec<SessionRecord>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.owner_user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InstanceRepository for StaticRepository {
    async fn get_instance(&self, subject_key: &str) -> mcpgw_repository::RepositoryResult<InstanceRecord> {
        self.instances
            .read()
            .await
            .get(subject_key)
            .cloned()
            .ok_or_else(|| mcpgw_repository::RepositoryError::not_found("instance", subject_key))
    }

    async fn put_instance(&self, instance: InstanceRecord) -> mcpgw_repository::RepositoryResult<()> {
        self.instances
            .write()
            .await
            .insert(instance.subject_key.clone(), instance);
        Ok(())
    }

    async fn delete_instance(&self, subject_key: &str) -> mcpgw_repository::RepositoryResult<()> {
        self.instances.write().await.remove(subject_key);
        Ok(())
    }

    async fn list_instances_for_target(&self, target_id: &str) -> mcpgw_repository::RepositoryResult<Vec<InstanceRecord>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.target_id == target_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RequestLogRepository for StaticRepository {
    async fn append_log(&self, entry: RequestLog) -> mcpgw_repository::RepositoryResult<()> {
        tracing::debug!(
            method = %entry.method,
            succeeded = entry.succeeded,
            session_id = ?entry.session_id,
            target_id = ?entry.target_id,
            "request"
        );
        Ok(())
    }
}

/// Adapts [`StaticRepository`]'s `PolicyRepository` into the narrower
/// [`PolicySource`] seam `mcpgw-authz` depends on.
pub struct RepoPolicySource(pub Arc<StaticRepository>);

#[async_trait]
impl PolicySource for RepoPolicySource {
    async fn load_policies(&self, target_id: Option<&str>) -> mcpgw_authz::AuthzResult<Vec<Policy>> {
        self.0
            .list_policies(target_id)
            .await
            .map_err(|e| mcpgw_authz::AuthzError::LoadFailed(e.to_string()))
    }
}

/// Adapts [`StaticRepository`]'s `EnvConfigRepository` into the narrower
/// [`EnvConfigSource`] seam `mcpgw-credentials` depends on.
pub struct RepoEnvConfigSource(pub Arc<StaticRepository>);

#[async_trait]
impl EnvConfigSource for RepoEnvConfigSource {
    async fn load_scope(
        &self,
        target_id: &str,
        scope: Scope,
        scope_value: Option<&str>,
    ) -> mcpgw_credentials::CredentialResult<Vec<EncryptedEnvEntry>> {
        let rows = self
            .0
            .list_env_config(target_id, scope_to_str(scope), scope_value)
            .await
            .map_err(|e| mcpgw_credentials::CredentialError::LoadFailed(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| EncryptedEnvEntry {
                key: row.key,
                encrypted_value: row.encrypted_value,
                description: row.description,
            })
            .collect())
    }
}

/// Resolves caller identity from plain `X-User-Id` / `X-User-Role` /
/// `X-User-Groups` headers (spec §1 notes the real authentication
/// middleware is an external collaborator this gateway only plugs into).
/// `X-User-Groups` is a comma-separated list; an absent `X-User-Id` is
/// treated as unauthenticated rather than defaulted to anonymous, since
/// default-deny authorization (spec §4.H) needs a stable subject to key
/// off of.
pub struct HeaderIdentityProvider;

#[async_trait]
impl IdentityProvider for HeaderIdentityProvider {
    async fn identify(&self, headers: &HeaderMap) -> Result<Identity, FrontendError> {
        let user_id = headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| FrontendError::Unauthenticated("missing X-User-Id header".to_string()))?
            .to_string();
        let role = headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("user")
            .to_string();
        let groups = headers
            .get("x-user-groups")
            .and_then(|v| v.to_str().ok())
            .map(|raw| raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        Ok(Identity { user_id, role, groups })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn sample_config() -> GatewayConfig {
        let toml = r#"
            [[targets]]
            name = "github"
            transport = "http"
            http_address = "https://github-mcp.internal"
            default_credential = "super-secret-token"

            [[policies]]
            name = "allow-everyone"
            target_name = "github"
            subjects = ["everyone"]

            [[env_config]]
            target_name = "github"
            scope = "default"
            key = "BASE_URL"
            value = "https://github-mcp.internal"
            "#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, toml.as_bytes()).unwrap();
        GatewayConfig::load(Some(file.path())).unwrap()
    }

    #[tokio::test]
    async fn seeds_targets_policies_and_env_config_from_static_declarations() {
        let key = EncryptionKey::new(&[7u8; 32]).unwrap();
        let gateway_config = sample_config();
        let repo = StaticRepository::from_config(&gateway_config, &key).unwrap();

        let target = repo.find_target_by_name("github").await.unwrap();
        assert_eq!(target.name, "github");
        assert!(target.default_credential.is_some());

        let policies = repo.list_policies(Some(&target.id)).await.unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].subjects, vec![Subject::Everyone]);

        let rows = repo.list_env_config(&target.id, "default", None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "BASE_URL");
        let decrypted = key.decrypt(&rows[0].encrypted_value).unwrap();
        assert_eq!(decrypted, b"https://github-mcp.internal");
    }

    #[tokio::test]
    async fn policy_source_adapter_delegates_to_the_repository() {
        let key = EncryptionKey::new(&[7u8; 32]).unwrap();
        let gateway_config = sample_config();
        let repo = StaticRepository::from_config(&gateway_config, &key).unwrap();
        let target = repo.find_target_by_name("github").await.unwrap();

        let source = RepoPolicySource(repo);
        let policies = source.load_policies(Some(&target.id)).await.unwrap();
        assert_eq!(policies.len(), 1);
    }

    #[tokio::test]
    async fn env_config_source_adapter_returns_encrypted_entries() {
        let key = EncryptionKey::new(&[7u8; 32]).unwrap();
        let gateway_config = sample_config();
        let repo = StaticRepository::from_config(&gateway_config, &key).unwrap();
        let target = repo.find_target_by_name("github").await.unwrap();

        let source = RepoEnvConfigSource(repo);
        let entries = source.load_scope(&target.id, Scope::Default, None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "BASE_URL");
    }

    #[tokio::test]
    async fn header_identity_provider_parses_user_role_and_groups() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("alice"));
        headers.insert("x-user-role", HeaderValue::from_static("admin"));
        headers.insert("x-user-groups", HeaderValue::from_static("eng, ops"));

        let identity = HeaderIdentityProvider.identify(&headers).await.unwrap();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.role, "admin");
        assert_eq!(identity.groups, vec!["eng".to_string(), "ops".to_string()]);
    }

    #[tokio::test]
    async fn header_identity_provider_rejects_missing_user_id() {
        let headers = HeaderMap::new();
        let result = HeaderIdentityProvider.identify(&headers).await;
        assert!(matches!(result, Err(FrontendError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn header_identity_provider_defaults_role_and_groups() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("bob"));
        let identity = HeaderIdentityProvider.identify(&headers).await.unwrap();
        assert_eq!(identity.role, "user");
        assert!(identity.groups.is_empty());
    }
}
