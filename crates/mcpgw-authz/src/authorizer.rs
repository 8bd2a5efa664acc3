//! Policy cache and priority-ordered first-match evaluation (spec §4.H).

use async_trait::async_trait;
use mcpgw_wire::ResourceKind;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::{AuthzError, AuthzResult};
use crate::policy::Policy;

/// The repository-backed source of policy rows; a real deployment wires
/// this to the out-of-scope REST/persistence surface (spec §1, §6).
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Load enabled policies for `target_id` (global policies included),
    /// or global-only policies if `target_id` is `None`.
    async fn load_policies(&self, target_id: Option<&str>) -> AuthzResult<Vec<Policy>>;
}

const GLOBAL_CACHE_KEY: &str = "global";

struct CompiledPolicy {
    policy: Policy,
    regex: Option<Regex>,
}

/// Outcome of `can_access`: whether the query is allowed, and the name of
/// the policy that decided it, if any (spec §4.H, invariant 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub matched_policy_name: Option<String>,
}

impl Decision {
    fn deny() -> Self {
        Self {
            allowed: false,
            matched_policy_name: None,
        }
    }

    fn decided(allowed: bool, name: &str) -> Self {
        Self {
            allowed,
            matched_policy_name: Some(name.to_string()),
        }
    }
}

pub struct Authorizer<S: PolicySource> {
    source: S,
    cache: RwLock<HashMap<String, Arc<Vec<CompiledPolicy>>>>,
}

impl<S: PolicySource> Authorizer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(target_id: Option<&str>) -> String {
        target_id.map_or_else(|| GLOBAL_CACHE_KEY.to_string(), str::to_string)
    }

    async fn policies_for(&self, target_id: Option<&str>) -> AuthzResult<Arc<Vec<CompiledPolicy>>> {
        let key = Self::cache_key(target_id);
        if let Some(cached) = self.cache.read().await.get(&key) {
            return Ok(Arc::clone(cached));
        }

        let mut policies = self.source.load_policies(target_id).await?;
        policies.retain(|p| p.enabled);
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));

        let compiled: Vec<CompiledPolicy> = policies
            .into_iter()
            .map(|policy| {
                let regex = policy
                    .resource_name_regex
                    .as_ref()
                    .filter(|pattern| !pattern.is_empty())
                    .and_then(|pattern| Regex::new(pattern).ok());
                CompiledPolicy { policy, regex }
            })
            .collect();
        let compiled = Arc::new(compiled);
        self.cache.write().await.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }

    pub async fn invalidate_target(&self, target_id: &str) {
        self.cache.write().await.remove(target_id);
    }

    /// `can-access(identity, targetId?, resourceKind, resourceName)` (spec
    /// §4.H). Default-deny if no policy matches, or if the policy list for
    /// the key fails to load.
    pub async fn can_access(
        &self,
        user_id: &str,
        role: &str,
        groups: &[String],
        target_id: Option<&str>,
        resource_kind: ResourceKind,
        resource_name: &str,
    ) -> AuthzResult<Decision> {
        let policies = self.policies_for(target_id).await?;

        for compiled in policies.iter() {
            let policy = &compiled.policy;
            if !policy.subject_matches(user_id, role, groups) {
                continue;
            }
            if !policy.resource_kind.matches(resource_kind) {
                continue;
            }
            if let Some(regex) = &compiled.regex {
                if !resource_name.is_empty() && !regex.is_match(resource_name) {
                    continue;
                }
            } else if policy.resource_name_regex.as_deref().is_some_and(|p| !p.is_empty()) {
                // Regex failed to compile: treat as non-matching (spec §4.H.2).
                continue;
            }

            trace!(policy = %policy.name, "policy matched");
            return Ok(Decision::decided(
                policy.effect == crate::policy::Effect::Allow,
                &policy.name,
            ));
        }

        debug!(target_id = ?target_id, resource_name, "default-deny: no policy matched");
        Ok(Decision::deny())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Effect, Subject};

    struct StaticSource(Vec<Policy>);

    #[async_trait]
    impl PolicySource for StaticSource {
        async fn load_policies(&self, target_id: Option<&str>) -> AuthzResult<Vec<Policy>> {
            Ok(self
                .0
                .iter()
                .filter(|p| p.target_id.is_none() || p.target_id.as_deref() == target_id)
                .cloned()
                .collect())
        }
    }

    fn policy(
        name: &str,
        priority: i64,
        effect: Effect,
        subjects: Vec<Subject>,
        kind: ResourceKind,
        regex: Option<&str>,
    ) -> Policy {
        Policy {
            id: name.to_string(),
            name: name.to_string(),
            target_id: None,
            resource_kind: kind,
            resource_name_regex: regex.map(str::to_string),
            effect,
            priority,
            enabled: true,
            subjects,
        }
    }

    #[tokio::test]
    async fn s1_default_deny_with_no_policies() {
        let authz = Authorizer::new(StaticSource(vec![]));
        let decision = authz
            .can_access("U", "user", &[], Some("targetX"), ResourceKind::Tool, "t1")
            .await
            .unwrap();
        assert_eq!(decision, Decision::deny());
    }

    #[tokio::test]
    async fn s2_priority_ordering() {
        let policies = vec![
            policy(
                "P1",
                100,
                Effect::Deny,
                vec![Subject::Everyone],
                ResourceKind::Tool,
                Some("delete_.*"),
            ),
            policy(
                "P2",
                200,
                Effect::Allow,
                vec![Subject::Role("admin".to_string())],
                ResourceKind::Tool,
                Some("delete_.*"),
            ),
        ];
        let authz = Authorizer::new(StaticSource(policies));

        let admin_delete = authz
            .can_access("u1", "admin", &[], None, ResourceKind::Tool, "delete_x")
            .await
            .unwrap();
        assert_eq!(admin_delete, Decision::decided(true, "P2"));

        let user_delete = authz
            .can_access("u1", "user", &[], None, ResourceKind::Tool, "delete_x")
            .await
            .unwrap();
        assert_eq!(user_delete, Decision::decided(false, "P1"));

        let read = authz
            .can_access("u1", "admin", &[], None, ResourceKind::Tool, "read_x")
            .await
            .unwrap();
        assert_eq!(read, Decision::deny());
    }

    #[tokio::test]
    async fn empty_regex_matches_any_name() {
        let policies = vec![policy(
            "P1",
            1,
            Effect::Allow,
            vec![Subject::Everyone],
            ResourceKind::Tool,
            Some(""),
        )];
        let authz = Authorizer::new(StaticSource(policies));
        let decision = authz
            .can_access("u", "role", &[], None, ResourceKind::Tool, "anything")
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn cache_is_populated_lazily_and_invalidated() {
        let authz = Authorizer::new(StaticSource(vec![policy(
            "P1",
            1,
            Effect::Allow,
            vec![Subject::Everyone],
            ResourceKind::All,
            None,
        )]));
        assert!(authz.cache.read().await.is_empty());
        let _ = authz
            .can_access("u", "role", &[], None, ResourceKind::Tool, "x")
            .await
            .unwrap();
        assert!(!authz.cache.read().await.is_empty());
        authz.invalidate_all().await;
        assert!(authz.cache.read().await.is_empty());
    }
}
