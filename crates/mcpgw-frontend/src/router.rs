//! Axum routes for the one logical MCP endpoint and its three verbs (spec
//! §4.L): request (POST), notification stream (GET), termination (DELETE).

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use mcpgw_authz::PolicySource;
use mcpgw_credentials::EnvConfigSource;
use mcpgw_proxy::ProxyEngine;
use mcpgw_repository::{SessionRepository, TargetRepository};
use mcpgw_session::SessionManager;
use mcpgw_wire::{JsonRpcErrorCode, JsonRpcRequest, JsonRpcResponse};
use serde::Deserialize;
use serde_json::Value;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::error::FrontendError;
use crate::hub::NotificationHub;
use crate::identity::IdentityProvider;

/// Header carrying the gateway session id, per spec §4.L / §6.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

fn session_id_from(headers: &HeaderMap, query: &SessionQuery) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.session_id.clone())
}

/// Shared state behind every handler. Generic over the same three seams the
/// proxy engine depends on, plus the session repository.
pub struct AppState<P, E, T, R>
where
    P: PolicySource + Send + Sync + 'static,
    E: EnvConfigSource + Send + Sync + 'static,
    T: TargetRepository + Send + Sync + 'static,
    R: SessionRepository + 'static,
{
    pub proxy: Arc<ProxyEngine<P, E, T>>,
    pub sessions: Arc<SessionManager<R>>,
    pub hub: NotificationHub,
    pub identity_provider: Arc<dyn IdentityProvider>,
    /// Path this router is mounted under, used to build the `endpoint`
    /// event's URL for SSE-compat bootstrap (spec §4.L GET, §6).
    pub mount_path: String,
}

impl<P, E, T, R> Clone for AppState<P, E, T, R>
where
    P: PolicySource + Send + Sync + 'static,
    E: EnvConfigSource + Send + Sync + 'static,
    T: TargetRepository + Send + Sync + 'static,
    R: SessionRepository + 'static,
{
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.clone(),
            sessions: self.sessions.clone(),
            hub: self.hub.clone(),
            identity_provider: self.identity_provider.clone(),
            mount_path: self.mount_path.clone(),
        }
    }
}

pub fn router<P, E, T, R>(state: AppState<P, E, T, R>) -> Router
where
    P: PolicySource + Send + Sync + 'static,
    E: EnvConfigSource + Send + Sync + 'static,
    T: TargetRepository + Send + Sync + 'static,
    R: SessionRepository + 'static,
{
    Router::new()
        .route(
            "/",
            get(handle_notification_stream)
                .post(handle_request)
                .delete(handle_termination),
        )
        .with_state(state)
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

/// Request verb (spec §4.L POST).
async fn handle_request<P, E, T, R>(
    State(state): State<AppState<P, E, T, R>>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    body: axum::body::Bytes,
) -> Result<Response, FrontendError>
where
    P: PolicySource + Send + Sync + 'static,
    E: EnvConfigSource + Send + Sync + 'static,
    T: TargetRepository + Send + Sync + 'static,
    R: SessionRepository + 'static,
{
    let identity = state.identity_provider.identify(&headers).await?;

    let value: Value =
        serde_json::from_slice(&body).map_err(|e| FrontendError::MalformedBody(e.to_string()))?;

    // A request with no `id` is a notification: accepted, not forwarded
    // (spec §4.K Notifications).
    if value.get("id").is_none() {
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    let request: JsonRpcRequest =
        serde_json::from_value(value).map_err(|e| FrontendError::MalformedBody(e.to_string()))?;

    // Cancels any in-flight upstream wait bound to this request if the
    // client disconnects before it completes (spec §5): hyper drops this
    // handler's future on a broken connection, and the guard's `Drop`
    // cancels the token any racing `ct.cancelled()` is selecting against.
    let ct = CancellationToken::new();
    let _cancel_on_disconnect = ct.clone().drop_guard();

    if request.method == "initialize" {
        let session = match state.sessions.find_by_owner(&identity.user_id).await {
            Some(existing) => existing,
            None => state
                .sessions
                .create(&identity)
                .await
                .map_err(|e| FrontendError::MalformedBody(e.to_string()))?,
        };
        let response = state.proxy.dispatch(&session, &identity, request, ct).await;
        let session_id = session.id.clone();
        return Ok(with_session_header(Json(response).into_response(), &session_id));
    }

    let session_id = session_id_from(&headers, &query).ok_or(FrontendError::MissingSessionId)?;
    let session = state
        .sessions
        .get(&session_id)
        .await
        .map_err(|_| FrontendError::SessionNotFound)?;
    if session.owner_user_id != identity.user_id {
        return Err(FrontendError::WrongOwner);
    }

    if SessionManager::<R>::needs_recycle(&session, &identity).await {
        state
            .sessions
            .recycle(&session, &identity)
            .await
            .map_err(|e| FrontendError::MalformedBody(e.to_string()))?;
        let error = mcpgw_wire::JsonRpcError::new(
            JsonRpcErrorCode::InvalidRequest.code(),
            "session recycled due to identity change — please re-initialize",
        );
        let response = JsonRpcResponse::error(error, Some(request.id));
        return Ok(with_session_header(Json(response).into_response(), &session.id));
    }

    let response = state.proxy.dispatch(&session, &identity, request, ct).await;
    Ok(with_session_header(Json(response).into_response(), &session.id))
}

/// Notification stream verb (spec §4.L GET).
async fn handle_notification_stream<P, E, T, R>(
    State(state): State<AppState<P, E, T, R>>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Result<Sse<Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>>, FrontendError>
where
    P: PolicySource + Send + Sync + 'static,
    E: EnvConfigSource + Send + Sync + 'static,
    T: TargetRepository + Send + Sync + 'static,
    R: SessionRepository + 'static,
{
    let identity = state.identity_provider.identify(&headers).await?;

    let (session_id, bootstrap) = match session_id_from(&headers, &query) {
        Some(id) => {
            let session = state
                .sessions
                .get(&id)
                .await
                .map_err(|_| FrontendError::SessionNotFound)?;
            if session.owner_user_id != identity.user_id {
                return Err(FrontendError::WrongOwner);
            }
            (id, false)
        }
        None => {
            let session = state
                .sessions
                .create(&identity)
                .await
                .map_err(|e| FrontendError::MalformedBody(e.to_string()))?;
            (session.id.clone(), true)
        }
    };

    let receiver = state.hub.subscribe(&session_id).await;
    let messages = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(payload) => Some(Ok::<Event, Infallible>(Event::default().event("message").data(payload))),
            Err(_) => None,
        }
    });

    let combined: Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> = if bootstrap {
        let endpoint_url = format!("{}?session_id={}", state.mount_path, session_id);
        let endpoint = stream::once(async move {
            Ok::<Event, Infallible>(Event::default().event("endpoint").data(endpoint_url))
        });
        Box::pin(endpoint.chain(messages))
    } else {
        Box::pin(messages)
    };

    Ok(Sse::new(combined).keep_alive(KeepAlive::default()))
}

/// Termination verb (spec §4.L DELETE).
async fn handle_termination<P, E, T, R>(
    State(state): State<AppState<P, E, T, R>>,
    headers: HeaderMap,
) -> Result<StatusCode, FrontendError>
where
    P: PolicySource + Send + Sync + 'static,
    E: EnvConfigSource + Send + Sync + 'static,
    T: TargetRepository + Send + Sync + 'static,
    R: SessionRepository + 'static,
{
    let identity = state.identity_provider.identify(&headers).await?;
    let session_id = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(FrontendError::MissingSessionId)?;

    let session = state
        .sessions
        .get(session_id)
        .await
        .map_err(|_| FrontendError::SessionNotFound)?;
    if session.owner_user_id != identity.user_id {
        return Err(FrontendError::WrongOwner);
    }

    state.hub.close(session_id).await;
    state
        .sessions
        .delete(session_id)
        .await
        .map_err(|_| FrontendError::SessionNotFound)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use mcpgw_authz::{AuthzResult, Effect, Policy, Subject};
    use mcpgw_credentials::{
        CredentialResolver, EncryptedEnvEntry, EncryptionKey, EnvConfigSource, Scope,
    };
    use mcpgw_instances::{new_container_manager, new_process_manager, InstanceManagerConfig};
    use mcpgw_proxy::{ClientFactory, ClientFactoryConfig, ProxyEngineConfig};
    use mcpgw_repository::{RepositoryError, RepositoryResult, SessionRecord, Target, TargetRepository};
    use mcpgw_session::SessionManagerConfig;
    use mcpgw_wire::ResourceKind;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;
    use tower::ServiceExt;

    /// No targets configured: initialize fan-out has nothing to connect to,
    /// so these tests exercise the HTTP verb plumbing (§4.L), not fan-out.
    struct EmptyTargetRepository;

    #[async_trait]
    impl TargetRepository for EmptyTargetRepository {
        async fn get_target(&self, id: &str) -> RepositoryResult<Target> {
            Err(RepositoryError::not_found("target", id))
        }
        async fn find_target_by_name(&self, name: &str) -> RepositoryResult<Target> {
            Err(RepositoryError::not_found("target", name))
        }
        async fn list_targets(&self, _only_enabled: bool) -> RepositoryResult<Vec<Target>> {
            Ok(vec![])
        }
        async fn put_target(&self, _target: Target) -> RepositoryResult<()> {
            Ok(())
        }
        async fn delete_target(&self, _id: &str) -> RepositoryResult<()> {
            Ok(())
        }
    }

    struct AllowAllPolicies;

    #[async_trait]
    impl PolicySource for AllowAllPolicies {
        async fn load_policies(&self, _target_id: Option<&str>) -> AuthzResult<Vec<Policy>> {
            Ok(vec![Policy {
                id: "allow-all".to_string(),
                name: "allow-all".to_string(),
                target_id: None,
                resource_kind: ResourceKind::All,
                resource_name_regex: None,
                effect: Effect::Allow,
                priority: 0,
                enabled: true,
                subjects: vec![Subject::Everyone],
            }])
        }
    }

    struct EmptyEnvSource;

    #[async_trait]
    impl EnvConfigSource for EmptyEnvSource {
        async fn load_scope(
            &self,
            _target_id: &str,
            _scope: Scope,
            _scope_value: Option<&str>,
        ) -> mcpgw_credentials::CredentialResult<Vec<EncryptedEnvEntry>> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct FakeSessionRepository {
        rows: AsyncMutex<StdHashMap<String, SessionRecord>>,
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

    /// Resolves identity from a plain `x-user-id`/`x-role` header pair,
    /// standing in for the out-of-scope JWT authentication middleware.
    struct HeaderIdentityProvider;

    #[async_trait]
    impl IdentityProvider for HeaderIdentityProvider {
        async fn identify(&self, headers: &HeaderMap) -> Result<mcpgw_wire::Identity, FrontendError> {
            let user_id = headers
                .get("x-user-id")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| FrontendError::Unauthenticated("missing x-user-id".to_string()))?
                .to_string();
            let role = headers
                .get("x-role")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("user")
                .to_string();
            Ok(mcpgw_wire::Identity { user_id, role, groups: vec![] })
        }
    }

    type TestState = AppState<AllowAllPolicies, EmptyEnvSource, EmptyTargetRepository, FakeSessionRepository>;

    fn test_state() -> TestState {
        let authorizer = Arc::new(mcpgw_authz::Authorizer::new(AllowAllPolicies));
        let credentials =
            CredentialResolver::new(EmptyEnvSource, EncryptionKey::new(&[7u8; 32]).unwrap());
        let instance_config = InstanceManagerConfig {
            max_instances: 4,
            idle_ttl: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(3600),
            gc_interval: Duration::from_secs(60),
        };
        let factory = Arc::new(ClientFactory::new(
            ClientFactoryConfig::default(),
            credentials,
            None,
            Arc::new(new_process_manager(instance_config.clone())),
            Arc::new(new_container_manager(instance_config)),
            None,
        ));
        let proxy = Arc::new(ProxyEngine::new(
            ProxyEngineConfig::default(),
            authorizer,
            factory,
            Arc::new(EmptyTargetRepository),
        ));
        let sessions = mcpgw_session::SessionManager::new(
            Arc::new(FakeSessionRepository::default()),
            SessionManagerConfig {
                timeout: Duration::from_secs(60),
                cleanup_interval: Duration::from_secs(60),
            },
        );
        AppState {
            proxy,
            sessions,
            hub: NotificationHub::new(),
            identity_provider: Arc::new(HeaderIdentityProvider),
            mount_path: "/mcp".to_string(),
        }
    }

    fn initialize_body() -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": {},
            "id": 1,
        })
        .to_string()
    }

    #[tokio::test]
    async fn initialize_creates_session_and_returns_header() {
        let app = router(test_state());
        let request = Request::post("/")
            .header("x-user-id", "u1")
            .header("content-type", "application/json")
            .body(Body::from(initialize_body()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_ID_HEADER).is_some());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["result"]["serverInfo"]["name"].as_str().is_some(), true);
    }

    #[tokio::test]
    async fn request_without_session_id_is_rejected() {
        let app = router(test_state());
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "ping",
            "id": 2,
        })
        .to_string();
        let request = Request::post("/")
            .header("x-user-id", "u1")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_owner_is_forbidden_on_termination() {
        let state = test_state();
        let app = router(state.clone());

        let init_request = Request::post("/")
            .header("x-user-id", "u1")
            .header("content-type", "application/json")
            .body(Body::from(initialize_body()))
            .unwrap();
        let init_response = app.clone().oneshot(init_request).await.unwrap();
        let session_id = init_response
            .headers()
            .get(SESSION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let delete_request = Request::delete("/")
            .header("x-user-id", "someone-else")
            .header(SESSION_ID_HEADER, session_id)
            .body(Body::empty())
            .unwrap();
        let delete_response = app.oneshot(delete_request).await.unwrap();
        assert_eq!(delete_response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn termination_deletes_session() {
        let state = test_state();
        let app = router(state.clone());

        let init_request = Request::post("/")
            .header("x-user-id", "u1")
            .header("content-type", "application/json")
            .body(Body::from(initialize_body()))
            .unwrap();
        let init_response = app.clone().oneshot(init_request).await.unwrap();
        let session_id = init_response
            .headers()
            .get(SESSION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let delete_request = Request::delete("/")
            .header("x-user-id", "u1")
            .header(SESSION_ID_HEADER, session_id.clone())
            .body(Body::empty())
            .unwrap();
        let delete_response = app.clone().oneshot(delete_request).await.unwrap();
        assert_eq!(delete_response.status(), StatusCode::NO_CONTENT);

        let second_delete = Request::delete("/")
            .header("x-user-id", "u1")
            .header(SESSION_ID_HEADER, session_id)
            .body(Body::empty())
            .unwrap();
        let second_response = app.oneshot(second_delete).await.unwrap();
        assert_eq!(second_response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn notification_stream_without_session_bootstraps_endpoint() {
        let app = router(test_state());
        let request = Request::get("/").header("x-user-id", "u1").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
    }
}
