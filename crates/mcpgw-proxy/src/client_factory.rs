//! Builds a live [`UpstreamClient`] for a [`Target`] on behalf of a
//! particular caller identity: resolves credentials, picks (or spawns) the
//! right transport, and reports whether the returned client is owned by the
//! caller (and therefore must be torn down when the session closes) or is a
//! shared handle living inside an instance manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mcpgw_credentials::{CredentialResolver, EnvConfigSource, ReservedKey};
use mcpgw_instances::{
    get_or_create_container, get_or_create_process, ContainerManager, ContainerResourceController,
    ContainerSpec, ProcessManager,
};
use mcpgw_repository::{AuthKind, IsolationBoundary as RepoIsolationBoundary, Target, TransportKind};
use mcpgw_upstream::{
    HttpUpstreamClient, HttpUpstreamConfig, ProcessUpstreamConfig, UpstreamAuth, UpstreamClient,
};
use mcpgw_wire::Identity;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::{ProxyError, ProxyResult};

#[derive(Debug, Clone)]
pub struct ClientFactoryConfig {
    pub request_timeout: Duration,
    pub container_readiness_timeout: Duration,
}

impl Default for ClientFactoryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            container_readiness_timeout: Duration::from_secs(30),
        }
    }
}

/// Turns isolation boundaries recorded against a [`Target`] into the key a
/// shared process/container lives under. The two enums are distinct types
/// owned by different crates, so this is a plain field-by-field mapping.
fn convert_isolation(boundary: RepoIsolationBoundary) -> mcpgw_instances::IsolationBoundary {
    match boundary {
        RepoIsolationBoundary::Shared => mcpgw_instances::IsolationBoundary::Shared,
        RepoIsolationBoundary::PerUser => mcpgw_instances::IsolationBoundary::PerUser,
        RepoIsolationBoundary::PerRole => mcpgw_instances::IsolationBoundary::PerRole,
        RepoIsolationBoundary::PerGroup => mcpgw_instances::IsolationBoundary::PerGroup,
    }
}

pub struct ClientFactory<E: EnvConfigSource> {
    config: ClientFactoryConfig,
    credentials: CredentialResolver<E>,
    default_credential_key: Option<mcpgw_credentials::EncryptionKey>,
    process_manager: Arc<ProcessManager>,
    container_manager: Arc<ContainerManager>,
    container_controller: Option<Arc<dyn ContainerResourceController>>,
}

impl<E: EnvConfigSource> ClientFactory<E> {
    pub fn new(
        config: ClientFactoryConfig,
        credentials: CredentialResolver<E>,
        default_credential_key: Option<mcpgw_credentials::EncryptionKey>,
        process_manager: Arc<ProcessManager>,
        container_manager: Arc<ContainerManager>,
        container_controller: Option<Arc<dyn ContainerResourceController>>,
    ) -> Self {
        Self {
            config,
            credentials,
            default_credential_key,
            process_manager,
            container_manager,
            container_controller,
        }
    }

    /// Resolves env/credential values for `target`, splitting out the
    /// reserved keys (`AUTH_TOKEN`, `AUTH_HEADER`, `BASE_URL`, `TIMEOUT`)
    /// from the arbitrary keys a process or container transport receives
    /// verbatim as environment variables.
    async fn resolve_env(
        &self,
        target: &Target,
        identity: &Identity,
    ) -> ProxyResult<(HashMap<ReservedKey, String>, Vec<(String, String)>)> {
        let resolved = self.credentials.resolve(&target.id, identity).await?;
        let mut reserved = HashMap::new();
        let mut plain = Vec::new();
        for (key, value) in resolved {
            if let Some(r) = ReservedKey::parse(&key) {
                reserved.insert(r, value.value);
            } else {
                plain.push((key, value.value));
            }
        }
        Ok((reserved, plain))
    }

    fn fallback_auth(&self, target: &Target) -> ProxyResult<UpstreamAuth> {
        let Some(blob) = &target.default_credential else {
            return Ok(UpstreamAuth::None);
        };
        let Some(key) = &self.default_credential_key else {
            return Ok(UpstreamAuth::None);
        };
        let plaintext = key
            .decrypt(blob)
            .map_err(|e| ProxyError::Configuration(format!("default credential: {e}")))?;
        let value = String::from_utf8(plaintext)
            .map_err(|_| ProxyError::Configuration("default credential is not valid utf-8".into()))?;
        match target.auth_kind {
            AuthKind::None => Ok(UpstreamAuth::None),
            AuthKind::Bearer => Ok(UpstreamAuth::Bearer(SecretString::from(value))),
            AuthKind::NamedHeader => {
                let name = target
                    .auth_header_name
                    .clone()
                    .ok_or_else(|| ProxyError::Configuration("missing auth header name".into()))?;
                Ok(UpstreamAuth::NamedHeader {
                    name,
                    value: SecretString::from(value),
                })
            }
        }
    }

    fn http_auth(
        &self,
        target: &Target,
        reserved: &HashMap<ReservedKey, String>,
    ) -> ProxyResult<UpstreamAuth> {
        if let Some(token) = reserved.get(&ReservedKey::AuthToken) {
            return Ok(UpstreamAuth::Bearer(SecretString::from(token.clone())));
        }
        if let Some(header) = reserved.get(&ReservedKey::AuthHeader) {
            let name = target
                .auth_header_name
                .clone()
                .unwrap_or_else(|| "Authorization".to_string());
            return Ok(UpstreamAuth::NamedHeader {
                name,
                value: SecretString::from(header.clone()),
            });
        }
        self.fallback_auth(target)
    }

    /// `AUTH_TOKEN` to inject into a process/container target's environment
    /// when no env-config row already supplies one (spec §4.D): falls back
    /// to the target's default credential the same way `http_auth` does for
    /// the HTTP header case, but only when it resolves to a bearer value —
    /// a named-header default credential has no environment-variable
    /// equivalent to inject here.
    fn fallback_auth_token_env(
        &self,
        target: &Target,
        reserved: &HashMap<ReservedKey, String>,
    ) -> ProxyResult<Option<String>> {
        if reserved.contains_key(&ReservedKey::AuthToken) {
            return Ok(None);
        }
        match self.fallback_auth(target)? {
            UpstreamAuth::Bearer(token) => Ok(Some(token.expose_secret().to_string())),
            UpstreamAuth::None | UpstreamAuth::NamedHeader { .. } => Ok(None),
        }
    }

    /// Builds (or fetches an already-running shared) upstream client for
    /// `target` acting as `identity`. Returns the client plus whether it is
    /// owned by this call site (process/container clients are shared and
    /// therefore never owned by a single caller).
    pub async fn build(
        &self,
        target: &Target,
        identity: &Identity,
    ) -> ProxyResult<(Arc<dyn UpstreamClient>, bool)> {
        let (reserved, plain_env) = self.resolve_env(target, identity).await?;

        match target.transport {
            TransportKind::Http | TransportKind::EventStream => {
                let base = reserved
                    .get(&ReservedKey::BaseUrl)
                    .cloned()
                    .or_else(|| target.http_address.clone())
                    .ok_or_else(|| {
                        ProxyError::Configuration(format!("target {} has no http address", target.id))
                    })?;
                let url = Url::parse(&base)
                    .map_err(|e| ProxyError::Configuration(format!("invalid target url: {e}")))?;
                let timeout = match reserved.get(&ReservedKey::Timeout) {
                    Some(raw) => mcpgw_credentials::parse_timeout(raw)?,
                    None => self.config.request_timeout,
                };
                let extra_headers = plain_env
                    .iter()
                    .map(|(k, v)| (mcpgw_credentials::env_header_name(k), v.clone()))
                    .collect();
                let config = HttpUpstreamConfig {
                    url,
                    auth: self.http_auth(target, &reserved)?,
                    extra_headers,
                    request_timeout: timeout,
                };
                let client = HttpUpstreamClient::new(config)?;
                Ok((Arc::new(client), true))
            }
            TransportKind::Process => {
                let command = target.process_command.clone().ok_or_else(|| {
                    ProxyError::Configuration(format!("target {} has no process command", target.id))
                })?;
                let mut env = plain_env;
                for (reserved_key, value) in &reserved {
                    env.push((reserved_key.as_str().to_string(), value.clone()));
                }
                if let Some(token) = self.fallback_auth_token_env(target, &reserved)? {
                    env.push((ReservedKey::AuthToken.as_str().to_string(), token));
                }
                let process_config = ProcessUpstreamConfig {
                    command,
                    args: target.process_args.clone(),
                    env,
                };
                let subject_key = mcpgw_instances::derive_subject_key(
                    convert_isolation(target.isolation),
                    &target.id,
                    &identity.user_id,
                    &identity.role,
                    &identity.groups,
                );
                let client = get_or_create_process(&self.process_manager, &subject_key, process_config)
                    .await
                    .map_err(ProxyError::from)?;
                Ok((client as Arc<dyn UpstreamClient>, false))
            }
            TransportKind::Container => {
                let controller = self.container_controller.clone().ok_or_else(|| {
                    ProxyError::Configuration("no container controller configured".into())
                })?;
                let image = target.container_image.clone().ok_or_else(|| {
                    ProxyError::Configuration(format!("target {} has no container image", target.id))
                })?;
                let port = target.container_port.ok_or_else(|| {
                    ProxyError::Configuration(format!("target {} has no container port", target.id))
                })?;
                let mut env = plain_env;
                for (reserved_key, value) in &reserved {
                    env.push((reserved_key.as_str().to_string(), value.clone()));
                }
                if let Some(token) = self.fallback_auth_token_env(target, &reserved)? {
                    env.push((ReservedKey::AuthToken.as_str().to_string(), token));
                }
                let command = target
                    .container_command
                    .clone()
                    .map(|_| target.container_args.clone());
                let spec = ContainerSpec {
                    image,
                    port,
                    health_probe_path: target.container_health_probe_path.clone(),
                    command,
                    env,
                };
                let subject_key = mcpgw_instances::derive_subject_key(
                    convert_isolation(target.isolation),
                    &target.id,
                    &identity.user_id,
                    &identity.role,
                    &identity.groups,
                );
                let container = get_or_create_container(
                    &self.container_manager,
                    controller,
                    &subject_key,
                    spec,
                    self.config.container_readiness_timeout,
                )
                .await
                .map_err(ProxyError::from)?;
                let url = container.url().ok_or_else(|| {
                    ProxyError::Configuration(format!("target {} container has no address", target.id))
                })?;
                let http_config = HttpUpstreamConfig {
                    url,
                    auth: self.http_auth(target, &reserved)?,
                    extra_headers: Vec::new(),
                    request_timeout: self.config.request_timeout,
                };
                let client = HttpUpstreamClient::new(http_config)?;
                Ok((Arc::new(client), false))
            }
        }
    }
}
