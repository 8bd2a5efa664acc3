//! The persistence contract consumed by the core (spec §6). Trait only —
//! REST/DB layers that implement it are out of scope; `ContainerResourceController`
//! in `mcpgw-instances` and `PolicySource` in `mcpgw-authz` are this same kind
//! of seam applied to a narrower surface.

use async_trait::async_trait;
use mcpgw_authz::Policy;

use crate::error::RepositoryResult;
use crate::models::{ApiToken, InstanceRecord, RequestLog, SessionRecord, Target, User};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, id: &str) -> RepositoryResult<User>;
    async fn find_user_by_username(&self, username: &str) -> RepositoryResult<User>;
    async fn put_user(&self, user: User) -> RepositoryResult<()>;
    async fn delete_user(&self, id: &str) -> RepositoryResult<()>;
}

#[async_trait]
pub trait ApiTokenRepository: Send + Sync {
    async fn get_token(&self, id: &str) -> RepositoryResult<ApiToken>;
    async fn find_token_by_hash(&self, token_hash: &str) -> RepositoryResult<ApiToken>;
    async fn put_token(&self, token: ApiToken) -> RepositoryResult<()>;
    async fn revoke_token(&self, id: &str) -> RepositoryResult<()>;
}

#[async_trait]
pub trait TargetRepository: Send + Sync {
    async fn get_target(&self, id: &str) -> RepositoryResult<Target>;
    async fn find_target_by_name(&self, name: &str) -> RepositoryResult<Target>;
    async fn list_targets(&self, only_enabled: bool) -> RepositoryResult<Vec<Target>>;
    async fn put_target(&self, target: Target) -> RepositoryResult<()>;
    async fn delete_target(&self, id: &str) -> RepositoryResult<()>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn get_policy(&self, id: &str) -> RepositoryResult<Policy>;
    async fn list_policies(&self, target_id: Option<&str>) -> RepositoryResult<Vec<Policy>>;
    async fn put_policy(&self, policy: Policy) -> RepositoryResult<()>;
    async fn delete_policy(&self, id: &str) -> RepositoryResult<()>;
}

/// One raw (still-encrypted) env-config row, the storage-side counterpart
/// of `mcpgw_credentials::EncryptedEnvEntry` plus the scope key it's stored
/// under.
#[derive(Debug, Clone)]
pub struct EnvConfigRow {
    pub target_id: String,
    pub scope: String,
    pub scope_value: Option<String>,
    pub key: String,
    pub encrypted_value: String,
    pub description: Option<String>,
}

#[async_trait]
pub trait EnvConfigRepository: Send + Sync {
    async fn list_env_config(
        &self,
        target_id: &str,
        scope: &str,
        scope_value: Option<&str>,
    ) -> RepositoryResult<Vec<EnvConfigRow>>;
    async fn put_env_config(&self, row: EnvConfigRow) -> RepositoryResult<()>;
    async fn delete_env_config(
        &self,
        target_id: &str,
        scope: &str,
        scope_value: Option<&str>,
        key: &str,
    ) -> RepositoryResult<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get_session(&self, id: &str) -> RepositoryResult<SessionRecord>;
    async fn put_session(&self, session: SessionRecord) -> RepositoryResult<()>;
    async fn delete_session(&self, id: &str) -> RepositoryResult<()>;
    async fn list_sessions_for_user(&self, user_id: &str) -> RepositoryResult<Vec<SessionRecord>>;
}

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn get_instance(&self, subject_key: &str) -> RepositoryResult<InstanceRecord>;
    async fn put_instance(&self, instance: InstanceRecord) -> RepositoryResult<()>;
    async fn delete_instance(&self, subject_key: &str) -> RepositoryResult<()>;
    async fn list_instances_for_target(
        &self,
        target_id: &str,
    ) -> RepositoryResult<Vec<InstanceRecord>>;
}

#[async_trait]
pub trait RequestLogRepository: Send + Sync {
    async fn append_log(&self, entry: RequestLog) -> RepositoryResult<()>;
}

/// The full persistence surface the core depends on, as one object-safe
/// handle. Spec §7 notes persistence failures during request logging are
/// non-fatal; callers of `RequestLogRepository::append_log` are expected to
/// log-and-continue on error rather than propagate it.
pub trait Repository:
    UserRepository
    + ApiTokenRepository
    + TargetRepository
    + PolicyRepository
    + EnvConfigRepository
    + SessionRepository
    + InstanceRepository
    + RequestLogRepository
{
}

impl<T> Repository for T where
    T: UserRepository
        + ApiTokenRepository
        + TargetRepository
        + PolicyRepository
        + EnvConfigRepository
        + SessionRepository
        + InstanceRepository
        + RequestLogRepository
{
}
