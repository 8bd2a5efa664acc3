//! The session manager (spec §4.J): creation, lookup with sliding expiry,
//! deletion, expiry sweep, and recycle semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mcpgw_repository::{SessionRecord, SessionRepository};
use mcpgw_wire::Identity;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};
use crate::session::Session;

pub struct SessionManagerConfig {
    pub timeout: Duration,
    pub cleanup_interval: Duration,
}

pub struct SessionManager<R: SessionRepository> {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    repository: Arc<R>,
    config: SessionManagerConfig,
}

impl<R: SessionRepository + 'static> SessionManager<R> {
    pub fn new(repository: Arc<R>, config: SessionManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            repository,
            config,
        })
    }

    pub async fn create(&self, identity: &Identity) -> SessionResult<Arc<Session>> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = now + self.config.timeout;

        self.repository
            .put_session(SessionRecord {
                id: id.clone(),
                owner_user_id: identity.user_id.clone(),
                role: identity.role.clone(),
                groups: identity.groups.clone(),
                created_at: now,
                expires_at,
            })
            .await?;

        let session = Arc::new(Session::new(id.clone(), identity, now, expires_at));
        self.sessions.write().await.insert(id, session.clone());
        Ok(session)
    }

    /// Look up a session, sliding its expiry forward on a hit (spec §4.J
    /// `get`). Falls back to the repository for a session this process
    /// doesn't hold in memory (e.g. after a restart), synthesizing a fresh
    /// in-memory shell with empty client maps — the client must
    /// re-initialize.
    pub async fn get(&self, session_id: &str) -> SessionResult<Arc<Session>> {
        if let Some(session) = self.sessions.read().await.get(session_id).cloned() {
            let now = Utc::now();
            if *session.expires_at.read().await < now {
                self.sessions.write().await.remove(session_id);
                self.repository.delete_session(session_id).await?;
                return Err(SessionError::NotFound(session_id.to_string()));
            }
            let new_expiry = now + self.config.timeout;
            *session.expires_at.write().await = new_expiry;
            let repository = self.repository.clone();
            let id = session_id.to_string();
            let identity = session.identity().await;
            let created_at = session.created_at;
            tokio::spawn(async move {
                let _ = repository
                    .put_session(SessionRecord {
                        id,
                        owner_user_id: identity.user_id,
                        role: identity.role,
                        groups: identity.groups,
                        created_at,
                        expires_at: new_expiry,
                    })
                    .await;
            });
            return Ok(session);
        }

        let record = self
            .repository
            .get_session(session_id)
            .await
            .map_err(|_| SessionError::NotFound(session_id.to_string()))?;
        if record.expires_at < Utc::now() {
            let _ = self.repository.delete_session(session_id).await;
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        let identity = Identity {
            user_id: record.owner_user_id,
            role: record.role,
            groups: record.groups,
        };
        let session = Arc::new(Session::new(
            record.id.clone(),
            &identity,
            record.created_at,
            record.expires_at,
        ));
        self.sessions
            .write()
            .await
            .insert(record.id, session.clone());
        Ok(session)
    }

    /// Find an in-memory session owned by `user_id`, used by the frontend's
    /// `initialize` handling to reuse a session rather than create a new
    /// one each time the same caller re-initializes (spec §4.L).
    pub async fn find_by_owner(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.owner_user_id == user_id)
            .cloned()
    }

    pub async fn delete(&self, session_id: &str) -> SessionResult<()> {
        let session = self.sessions.write().await.remove(session_id);
        if let Some(session) = session {
            session.close_owned_clients().await;
        }
        self.repository.delete_session(session_id).await?;
        Ok(())
    }

    pub async fn needs_recycle(session: &Session, identity: &Identity) -> bool {
        !session.identity().await.same_groups(identity) || *session.role.read().await != identity.role
    }

    /// Reset a session's state while preserving its id (spec §4.J recycle
    /// semantics). Any subsequent non-initialize request against this
    /// session must be rejected with `NotInitialized` until the client
    /// re-initializes.
    pub async fn recycle(&self, session: &Arc<Session>, identity: &Identity) -> SessionResult<()> {
        session.close_owned_clients().await;
        session.clear_state().await;
        *session.role.write().await = identity.role.clone();
        *session.groups.write().await = identity.groups.clone();

        self.repository
            .put_session(SessionRecord {
                id: session.id.clone(),
                owner_user_id: session.owner_user_id.clone(),
                role: identity.role.clone(),
                groups: identity.groups.clone(),
                created_at: session.created_at,
                expires_at: *session.expires_at.read().await,
            })
            .await?;
        Ok(())
    }

    /// Recycle every in-memory session owned by `user_id`, after reloading
    /// the fresh identity (spec §4.J bulk recycle). Session pointers are
    /// copied out from under the map lock before recycling each one, so no
    /// session's own state is mutated while the map lock is held (Open
    /// Question decision, see repository-level ledger).
    pub async fn recycle_user_sessions(&self, user_id: &str, fresh_identity: &Identity) -> SessionResult<usize> {
        let owned: Vec<Arc<Session>> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.owner_user_id == user_id)
            .cloned()
            .collect();

        let mut recycled = 0;
        for session in &owned {
            self.recycle(session, fresh_identity).await?;
            recycled += 1;
        }
        Ok(recycled)
    }

    async fn sweep_once(&self) {
        let now = Utc::now();
        let expired: Vec<Arc<Session>> = {
            let mut map = self.sessions.write().await;
            let expired_ids: Vec<String> = {
                let mut ids = Vec::new();
                for (id, session) in map.iter() {
                    if *session.expires_at.read().await < now {
                        ids.push(id.clone());
                    }
                }
                ids
            };
            expired_ids
                .into_iter()
                .filter_map(|id| map.remove(&id))
                .collect()
        };

        for session in &expired {
            session.close_owned_clients().await;
            if let Err(err) = self.repository.delete_session(&session.id).await {
                tracing::warn!(session_id = %session.id, error = %err, "failed to delete expired session record");
            }
        }
    }

    pub async fn spawn_sweep_loop(self: &Arc<Self>, ct: CancellationToken) {
        let manager = self.clone();
        let interval = manager.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ct.cancelled() => break,
                    _ = ticker.tick() => manager.sweep_once().await,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcpgw_repository::{RepositoryError, RepositoryResult};
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct FakeSessionRepository {
        rows: AsyncMutex<HashMap<String, SessionRecord>>,
    }

    #[async_trait]
    impl SessionRepository for FakeSessionRepository {
        async fn get_session(&self, id: &str) -> RepositoryResult<SessionRecord> {
            self.rows
                .lock()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| RepositoryError::not_found("session", id))
        }

        async fn put_session(&self, session: SessionRecord) -> RepositoryResult<()> {
            self.rows.lock().await.insert(session.id.clone(), session);
            Ok(())
        }

        async fn delete_session(&self, id: &str) -> RepositoryResult<()> {
            self.rows.lock().await.remove(id);
            Ok(())
        }

        async fn list_sessions_for_user(&self, user_id: &str) -> RepositoryResult<Vec<SessionRecord>> {
            Ok(self
                .rows
                .lock()
                .await
                .values()
                .filter(|r| r.owner_user_id == user_id)
                .cloned()
                .collect())
        }
    }

    fn identity() -> Identity {
        Identity {
            user_id: "u1".into(),
            role: "user".into(),
            groups: vec!["eng".into()],
        }
    }

    fn manager() -> Arc<SessionManager<FakeSessionRepository>> {
        SessionManager::new(
            Arc::new(FakeSessionRepository::default()),
            SessionManagerConfig {
                timeout: Duration::from_secs(60),
                cleanup_interval: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn create_then_get_returns_same_session() {
        let mgr = manager();
        let created = mgr.create(&identity()).await.unwrap();
        let fetched = mgr.get(&created.id).await.unwrap();
        assert_eq!(created.id, fetched.id);
        assert_eq!(fetched.owner_user_id, "u1");
    }

    #[tokio::test]
    async fn get_unknown_session_is_not_found() {
        let mgr = manager();
        let err = mgr.get("missing").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let mgr = manager();
        let created = mgr.create(&identity()).await.unwrap();
        mgr.delete(&created.id).await.unwrap();
        assert!(mgr.get(&created.id).await.is_err());
    }

    #[tokio::test]
    async fn needs_recycle_detects_role_change() {
        let session = Session::new("s1".into(), &identity(), Utc::now(), Utc::now() + chrono::Duration::seconds(60));
        let same = identity();
        assert!(!SessionManager::<FakeSessionRepository>::needs_recycle(&session, &same).await);

        let changed_role = Identity {
            role: "admin".into(),
            ..identity()
        };
        assert!(SessionManager::<FakeSessionRepository>::needs_recycle(&session, &changed_role).await);

        let changed_groups = Identity {
            groups: vec!["other".into()],
            ..identity()
        };
        assert!(SessionManager::<FakeSessionRepository>::needs_recycle(&session, &changed_groups).await);
    }

    #[tokio::test]
    async fn recycle_preserves_session_id_and_clears_state() {
        let mgr = manager();
        let session = mgr.create(&identity()).await.unwrap();
        *session.initialized.write().await = true;

        let new_identity = Identity {
            role: "admin".into(),
            ..identity()
        };
        mgr.recycle(&session, &new_identity).await.unwrap();

        assert_eq!(session.id, session.id);
        assert!(!*session.initialized.read().await);
        assert_eq!(*session.role.read().await, "admin");
    }

    #[tokio::test]
    async fn recycle_user_sessions_recycles_every_session_for_owner() {
        let mgr = manager();
        let s1 = mgr.create(&identity()).await.unwrap();
        let s2 = mgr.create(&identity()).await.unwrap();
        let other = Identity {
            user_id: "u2".into(),
            ..identity()
        };
        let s3 = mgr.create(&other).await.unwrap();

        let fresh = Identity {
            role: "admin".into(),
            ..identity()
        };
        let count = mgr.recycle_user_sessions("u1", &fresh).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(*s1.role.read().await, "admin");
        assert_eq!(*s2.role.read().await, "admin");
        assert_eq!(*s3.role.read().await, "user");
    }
}
