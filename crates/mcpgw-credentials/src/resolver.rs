//! Four-level scope merge for credential/env resolution (spec §4.I).

use async_trait::async_trait;
use mcpgw_wire::Identity;
use std::collections::HashMap;

use crate::encryption::EncryptionKey;
use crate::error::CredentialResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Default,
    Role,
    Group,
    User,
}

/// One encrypted env-config row as stored (spec §3 Env config).
#[derive(Debug, Clone)]
pub struct EncryptedEnvEntry {
    pub key: String,
    pub encrypted_value: String,
    pub description: Option<String>,
}

/// The out-of-scope persistence surface this resolver reads from (spec §1,
/// §6): typed reads over env config rows, keyed by (target, scope,
/// scope-value).
#[async_trait]
pub trait EnvConfigSource: Send + Sync {
    async fn load_scope(
        &self,
        target_id: &str,
        scope: Scope,
        scope_value: Option<&str>,
    ) -> CredentialResult<Vec<EncryptedEnvEntry>>;
}

#[derive(Debug, Clone)]
pub struct ResolvedValue {
    pub value: String,
    pub source: Scope,
    pub scope_value: Option<String>,
}

pub struct CredentialResolver<S: EnvConfigSource> {
    source: S,
    key: EncryptionKey,
}

impl<S: EnvConfigSource> CredentialResolver<S> {
    pub fn new(source: S, key: EncryptionKey) -> Self {
        Self { source, key }
    }

    fn decrypt_entries(
        &self,
        entries: Vec<EncryptedEnvEntry>,
    ) -> CredentialResult<Vec<(String, String)>> {
        entries
            .into_iter()
            .map(|entry| {
                let plaintext = self.key.decrypt(&entry.encrypted_value)?;
                let value = String::from_utf8_lossy(&plaintext).into_owned();
                Ok((entry.key, value))
            })
            .collect()
    }

    /// Merge default < role < group(s) < user, where a key set at `User`
    /// scope cannot be overridden by a later group pass — moot in this
    /// fixed application order, but implemented as specified (spec §4.I,
    /// SPEC_FULL.md notes this guard is a no-op given the order chosen;
    /// kept for literal fidelity and because changing iteration order later
    /// would silently reintroduce the bug it guards against).
    pub async fn resolve(
        &self,
        target_id: &str,
        identity: &Identity,
    ) -> CredentialResult<HashMap<String, ResolvedValue>> {
        let mut acc: HashMap<String, ResolvedValue> = HashMap::new();

        for (key, value) in
            self.decrypt_entries(self.source.load_scope(target_id, Scope::Default, None).await?)?
        {
            acc.insert(
                key,
                ResolvedValue {
                    value,
                    source: Scope::Default,
                    scope_value: None,
                },
            );
        }

        for (key, value) in self.decrypt_entries(
            self.source
                .load_scope(target_id, Scope::Role, Some(&identity.role))
                .await?,
        )? {
            acc.insert(
                key,
                ResolvedValue {
                    value,
                    source: Scope::Role,
                    scope_value: Some(identity.role.clone()),
                },
            );
        }

        for group in &identity.groups {
            for (key, value) in self.decrypt_entries(
                self.source
                    .load_scope(target_id, Scope::Group, Some(group))
                    .await?,
            )? {
                if acc.get(&key).is_some_and(|v| v.source == Scope::User) {
                    continue;
                }
                acc.insert(
                    key,
                    ResolvedValue {
                        value,
                        source: Scope::Group,
                        scope_value: Some(group.clone()),
                    },
                );
            }
        }

        for (key, value) in self.decrypt_entries(
            self.source
                .load_scope(target_id, Scope::User, Some(&identity.user_id))
                .await?,
        )? {
            acc.insert(
                key,
                ResolvedValue {
                    value,
                    source: Scope::User,
                    scope_value: Some(identity.user_id.clone()),
                },
            );
        }

        Ok(acc)
    }

    /// The parallel single-value precedence path: first of
    /// `{user, role, first matching group, default}` that exists for `key`
    /// (spec §4.I "Legacy token resolution").
    pub async fn resolve_legacy(
        &self,
        target_id: &str,
        identity: &Identity,
        key: &str,
    ) -> CredentialResult<Option<ResolvedValue>> {
        let user_entries = self
            .source
            .load_scope(target_id, Scope::User, Some(&identity.user_id))
            .await?;
        if let Some(entry) = user_entries.into_iter().find(|e| e.key == key) {
            let plaintext = self.key.decrypt(&entry.encrypted_value)?;
            return Ok(Some(ResolvedValue {
                value: String::from_utf8_lossy(&plaintext).into_owned(),
                source: Scope::User,
                scope_value: Some(identity.user_id.clone()),
            }));
        }

        let role_entries = self
            .source
            .load_scope(target_id, Scope::Role, Some(&identity.role))
            .await?;
        if let Some(entry) = role_entries.into_iter().find(|e| e.key == key) {
            let plaintext = self.key.decrypt(&entry.encrypted_value)?;
            return Ok(Some(ResolvedValue {
                value: String::from_utf8_lossy(&plaintext).into_owned(),
                source: Scope::Role,
                scope_value: Some(identity.role.clone()),
            }));
        }

        for group in &identity.groups {
            let group_entries = self
                .source
                .load_scope(target_id, Scope::Group, Some(group))
                .await?;
            if let Some(entry) = group_entries.into_iter().find(|e| e.key == key) {
                let plaintext = self.key.decrypt(&entry.encrypted_value)?;
                return Ok(Some(ResolvedValue {
                    value: String::from_utf8_lossy(&plaintext).into_owned(),
                    source: Scope::Group,
                    scope_value: Some(group.clone()),
                }));
            }
        }

        let default_entries = self.source.load_scope(target_id, Scope::Default, None).await?;
        if let Some(entry) = default_entries.into_iter().find(|e| e.key == key) {
            let plaintext = self.key.decrypt(&entry.encrypted_value)?;
            return Ok(Some(ResolvedValue {
                value: String::from_utf8_lossy(&plaintext).into_owned(),
                source: Scope::Default,
                scope_value: None,
            }));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource {
        key: EncryptionKey,
        rows: HashMap<(Scope, Option<String>), Vec<(String, String)>>,
    }

    #[async_trait]
    impl EnvConfigSource for FakeSource {
        async fn load_scope(
            &self,
            _target_id: &str,
            scope: Scope,
            scope_value: Option<&str>,
        ) -> CredentialResult<Vec<EncryptedEnvEntry>> {
            let k = (scope, scope_value.map(str::to_string));
            Ok(self
                .rows
                .get(&k)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|(key, plaintext)| EncryptedEnvEntry {
                    key,
                    encrypted_value: self.key.encrypt(plaintext.as_bytes()).unwrap(),
                    description: None,
                })
                .collect())
        }
    }

    fn identity() -> Identity {
        Identity {
            user_id: "U".to_string(),
            role: "eng".to_string(),
            groups: vec!["a".to_string()],
        }
    }

    fn source_with(rows: HashMap<(Scope, Option<String>), Vec<(String, String)>>) -> FakeSource {
        FakeSource {
            key: EncryptionKey::new(&[7u8; 32]).unwrap(),
            rows,
        }
    }

    #[tokio::test]
    async fn s5_credential_precedence_full_stack() {
        let mut rows = HashMap::new();
        rows.insert((Scope::Default, None), vec![("AUTH_TOKEN".to_string(), "d".to_string())]);
        rows.insert(
            (Scope::Role, Some("eng".to_string())),
            vec![("AUTH_TOKEN".to_string(), "r".to_string())],
        );
        rows.insert(
            (Scope::Group, Some("a".to_string())),
            vec![("AUTH_TOKEN".to_string(), "g".to_string())],
        );
        rows.insert(
            (Scope::User, Some("U".to_string())),
            vec![("AUTH_TOKEN".to_string(), "u".to_string())],
        );
        let resolver = CredentialResolver::new(source_with(rows), EncryptionKey::new(&[7u8; 32]).unwrap());
        let resolved = resolver.resolve("t1", &identity()).await.unwrap();
        let token = &resolved["AUTH_TOKEN"];
        assert_eq!(token.value, "u");
        assert_eq!(token.source, Scope::User);
    }

    #[tokio::test]
    async fn s5_falls_back_to_group_without_user_entry() {
        let mut rows = HashMap::new();
        rows.insert((Scope::Default, None), vec![("AUTH_TOKEN".to_string(), "d".to_string())]);
        rows.insert(
            (Scope::Role, Some("eng".to_string())),
            vec![("AUTH_TOKEN".to_string(), "r".to_string())],
        );
        rows.insert(
            (Scope::Group, Some("a".to_string())),
            vec![("AUTH_TOKEN".to_string(), "g".to_string())],
        );
        let resolver = CredentialResolver::new(source_with(rows), EncryptionKey::new(&[7u8; 32]).unwrap());
        let resolved = resolver.resolve("t1", &identity()).await.unwrap();
        assert_eq!(resolved["AUTH_TOKEN"].value, "g");
        assert_eq!(resolved["AUTH_TOKEN"].source, Scope::Group);
    }

    #[tokio::test]
    async fn s5_falls_back_to_default_with_nothing_else() {
        let mut rows = HashMap::new();
        rows.insert((Scope::Default, None), vec![("AUTH_TOKEN".to_string(), "d".to_string())]);
        let resolver = CredentialResolver::new(source_with(rows), EncryptionKey::new(&[7u8; 32]).unwrap());
        let resolved = resolver.resolve("t1", &identity()).await.unwrap();
        assert_eq!(resolved["AUTH_TOKEN"].value, "d");
        assert_eq!(resolved["AUTH_TOKEN"].source, Scope::Default);
    }

    #[tokio::test]
    async fn legacy_resolution_short_circuits_on_first_match() {
        let mut rows = HashMap::new();
        rows.insert((Scope::Default, None), vec![("AUTH_TOKEN".to_string(), "d".to_string())]);
        rows.insert(
            (Scope::Role, Some("eng".to_string())),
            vec![("AUTH_TOKEN".to_string(), "r".to_string())],
        );
        let resolver = CredentialResolver::new(source_with(rows), EncryptionKey::new(&[7u8; 32]).unwrap());
        let resolved = resolver
            .resolve_legacy("t1", &identity(), "AUTH_TOKEN")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.value, "r");
        assert_eq!(resolved.source, Scope::Role);
    }
}
