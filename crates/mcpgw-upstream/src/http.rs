//! Streamable-HTTP upstream client with event-stream fallback (spec §4.C).
//!
//! Transport mode is auto-detected on the first `initialize` and then fixed
//! for the lifetime of the client: either every request/response round trips
//! synchronously as the POST body ("streamable"), or the POST only
//! acknowledges (202) and the real response arrives asynchronously on a
//! long-lived GET stream correlated by request id ("event-stream").

use async_trait::async_trait;
use mcpgw_wire::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    PromptDescriptor, RequestId, ResourceDescriptor, ServerCapabilities, ServerInfo,
    ToolDescriptor,
};
use reqwest_eventsource::{Event as SseEvent, EventSource};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::auth::UpstreamAuth;
use crate::client::{Page, UpstreamClient, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{UpstreamError, UpstreamResult};
use crate::pending::PendingTable;

const ENDPOINT_EVENT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportMode {
    Streamable,
    EventStream,
}

pub struct HttpUpstreamConfig {
    pub url: Url,
    pub auth: UpstreamAuth,
    /// Headers written verbatim by the credential resolver's non-reserved
    /// keys (spec §4.I: `X-Env-`-prefixed).
    pub extra_headers: Vec<(String, String)>,
    pub request_timeout: Duration,
}

impl Default for HttpUpstreamConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://localhost").expect("static url"),
            auth: UpstreamAuth::None,
            extra_headers: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct HttpUpstreamClient {
    client: reqwest::Client,
    config: HttpUpstreamConfig,
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
    session_id: Mutex<Option<String>>,
    mode: Mutex<Option<TransportMode>>,
    event_stream_endpoint: Mutex<Option<Url>>,
    reader_task: AsyncMutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
    dead: Arc<AtomicBool>,
    capabilities: Mutex<Option<ServerCapabilities>>,
    server_info: Mutex<Option<ServerInfo>>,
}

impl std::fmt::Debug for HttpUpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpstreamClient")
            .field("url", &self.config.url)
            .field("mode", &*self.mode.lock().expect("mode mutex poisoned"))
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish()
    }
}

impl HttpUpstreamClient {
    pub fn new(config: HttpUpstreamConfig) -> UpstreamResult<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .danger_accept_invalid_certs(false)
            .tls_built_in_root_certs(true)
            .min_tls_version(reqwest::tls::Version::TLS_1_3)
            .build()
            .map_err(|e| UpstreamError::Configuration(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            next_id: AtomicU64::new(1),
            pending: Arc::new(PendingTable::new()),
            session_id: Mutex::new(None),
            mode: Mutex::new(None),
            event_stream_endpoint: Mutex::new(None),
            reader_task: AsyncMutex::new(None),
            initialized: AtomicBool::new(false),
            dead: Arc::new(AtomicBool::new(false)),
            capabilities: Mutex::new(None),
            server_info: Mutex::new(None),
        })
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst) as i64)
    }

    fn apply_auth(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder = match &self.config.auth {
            UpstreamAuth::None => builder,
            UpstreamAuth::Bearer(token) => {
                builder.header("Authorization", format!("Bearer {}", token.expose_secret()))
            }
            UpstreamAuth::NamedHeader { name, value } => {
                builder.header(name.as_str(), value.expose_secret())
            }
        };
        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(session_id) = self.session_id.lock().expect("session mutex poisoned").clone() {
            builder = builder.header("Mcp-Session-Id", session_id);
        }
        builder
    }

    fn capture_session_header(&self, response: &reqwest::Response) {
        if let Some(value) = response.headers().get("Mcp-Session-Id") {
            if let Ok(value) = value.to_str() {
                *self.session_id.lock().expect("session mutex poisoned") = Some(value.to_string());
            }
        }
    }

    /// First detection attempt: direct POST, expecting either a JSON body or
    /// a single SSE-framed response in the same body.
    async fn try_streamable_post(
        &self,
        request: &JsonRpcRequest,
        ct: &CancellationToken,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        let builder = self
            .client
            .post(self.config.url.clone())
            .timeout(self.config.request_timeout)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(request);
        let response = tokio::select! {
            result = self.apply_auth(builder).send() => result?,
            _ = ct.cancelled() => return Err(UpstreamError::Cancelled),
        };
        if !response.status().is_success() {
            let status = response.status();
            return Err(UpstreamError::ConnectionFailed(format!(
                "HTTP {status} from streamable POST"
            )));
        }
        self.capture_session_header(&response);

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let body = response.text().await?;
            parse_first_message_event(&body)
        } else {
            response
                .json::<JsonRpcResponse>()
                .await
                .map_err(UpstreamError::from)
        }
    }

    /// Second detection attempt: open the persistent GET stream, wait for
    /// the bootstrap `endpoint` event, then POST to the advertised endpoint.
    async fn try_event_stream_fallback(
        &self,
        request: &JsonRpcRequest,
        ct: &CancellationToken,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        let builder = self
            .client
            .get(self.config.url.clone())
            .header("Accept", "text/event-stream");
        let mut source = EventSource::new(self.apply_auth(builder))
            .map_err(|e| UpstreamError::ConnectionFailed(format!("opening event stream: {e}")))?;

        let endpoint = tokio::select! {
            result = tokio::time::timeout(ENDPOINT_EVENT_TIMEOUT, async {
                use futures::StreamExt;
                while let Some(event) = source.next().await {
                    match event {
                        Ok(SseEvent::Message(message)) if message.event == "endpoint" => {
                            return Ok(message.data);
                        }
                        Ok(_) => continue,
                        Err(e) => return Err(UpstreamError::ConnectionFailed(e.to_string())),
                    }
                }
                Err(UpstreamError::ConnectionFailed(
                    "event stream closed before an endpoint event".to_string(),
                ))
            }) => result
                .map_err(|_| UpstreamError::Timeout(ENDPOINT_EVENT_TIMEOUT))??,
            _ = ct.cancelled() => return Err(UpstreamError::Cancelled),
        };

        let endpoint_url = self
            .config
            .url
            .join(&endpoint)
            .map_err(|e| UpstreamError::Protocol(format!("invalid endpoint url {endpoint}: {e}")))?;
        *self.event_stream_endpoint.lock().expect("endpoint mutex poisoned") = Some(endpoint_url.clone());

        let rx = self.pending.register(request.id.clone());
        self.post_to_event_endpoint(&endpoint_url, request).await?;
        self.spawn_reader(source);

        self.await_pending_response(ct, &request.id, rx).await
    }

    /// Races the correlated response against the per-request wall-clock
    /// timeout and the caller's cancellation, unregistering the rendezvous
    /// slot on either losing path (spec §4.B, §5, §9).
    async fn await_pending_response(
        &self,
        ct: &CancellationToken,
        request_id: &RequestId,
        rx: oneshot::Receiver<JsonRpcResponse>,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        tokio::select! {
            result = rx => result.map_err(|_| UpstreamError::transport_dead("response slot dropped")),
            _ = tokio::time::sleep(self.config.request_timeout) => {
                self.pending.unregister(request_id);
                Err(UpstreamError::Timeout(self.config.request_timeout))
            }
            _ = ct.cancelled() => {
                self.pending.unregister(request_id);
                Err(UpstreamError::Cancelled)
            }
        }
    }

    async fn post_to_event_endpoint(
        &self,
        endpoint: &Url,
        request: &JsonRpcRequest,
    ) -> Result<(), UpstreamError> {
        let builder = self
            .client
            .post(endpoint.clone())
            .timeout(self.config.request_timeout)
            .header("Content-Type", "application/json")
            .json(request);
        let response = self.apply_auth(builder).send().await?;
        if response.status() != reqwest::StatusCode::ACCEPTED && !response.status().is_success() {
            return Err(UpstreamError::ConnectionFailed(format!(
                "HTTP {} posting to event-stream endpoint",
                response.status()
            )));
        }
        self.capture_session_header(&response);
        Ok(())
    }

    fn spawn_reader(&self, mut source: EventSource) {
        let pending = Arc::clone(&self.pending);
        let dead = Arc::clone(&self.dead);
        let handle = tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(event) = source.next().await {
                match event {
                    Ok(SseEvent::Message(message)) if message.event == "message" => {
                        match serde_json::from_str::<JsonRpcResponse>(&message.data) {
                            Ok(response) => pending.dispatch(response),
                            Err(e) => warn!("dropping malformed event-stream message: {e}"),
                        }
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("event-stream reader ending: {e}");
                        break;
                    }
                }
            }
            dead.store(true, Ordering::SeqCst);
            pending.drain_with_error();
        });
        // best-effort: a prior handle should not exist at this point
        if let Ok(mut guard) = self.reader_task.try_lock() {
            *guard = Some(handle);
        }
    }

    async fn send(
        &self,
        request: JsonRpcRequest,
        ct: &CancellationToken,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(UpstreamError::transport_dead("http client marked dead"));
        }
        match *self.mode.lock().expect("mode mutex poisoned") {
            Some(TransportMode::Streamable) => self.try_streamable_post(&request, ct).await,
            Some(TransportMode::EventStream) => {
                let endpoint = self
                    .event_stream_endpoint
                    .lock()
                    .expect("endpoint mutex poisoned")
                    .clone()
                    .ok_or_else(|| UpstreamError::Protocol("missing event-stream endpoint".into()))?;
                let rx = self.pending.register(request.id.clone());
                if let Err(e) = self.post_to_event_endpoint(&endpoint, &request).await {
                    self.pending.unregister(&request.id);
                    return Err(e);
                }
                self.await_pending_response(ct, &request.id, rx).await
            }
            None => Err(UpstreamError::Protocol("client not initialized".into())),
        }
    }

    async fn call(&self, ct: &CancellationToken, method: &str, params: Value) -> UpstreamResult<Value> {
        let request = JsonRpcRequest::new(method, Some(params), self.next_request_id());
        let response = self.send(request, ct).await?;
        response
            .into_result()
            .map_err(|e: JsonRpcError| UpstreamError::upstream(e.code, e.message))
    }
}

fn parse_first_message_event(body: &str) -> Result<JsonRpcResponse, UpstreamError> {
    let mut data_lines = Vec::new();
    let mut in_message_event = false;
    for line in body.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            in_message_event = event.trim() == "message";
        } else if let Some(data) = line.strip_prefix("data:") {
            if in_message_event {
                data_lines.push(data.trim_start().to_string());
            }
        } else if line.is_empty() && !data_lines.is_empty() {
            break;
        }
    }
    if data_lines.is_empty() {
        return Err(UpstreamError::Protocol(
            "no message event found in event-stream body".to_string(),
        ));
    }
    serde_json::from_str(&data_lines.join("\n")).map_err(UpstreamError::from)
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn initialize(
        &self,
        ct: CancellationToken,
        params: InitializeParams,
    ) -> UpstreamResult<InitializeResult> {
        let request = JsonRpcRequest::new(
            "initialize",
            Some(serde_json::to_value(&params)?),
            self.next_request_id(),
        );

        let response = match self.try_streamable_post(&request, &ct).await {
            Ok(response) => {
                *self.mode.lock().expect("mode mutex poisoned") = Some(TransportMode::Streamable);
                response
            }
            Err(streamable_err) => {
                match self.try_event_stream_fallback(&request, &ct).await {
                    Ok(response) => {
                        *self.mode.lock().expect("mode mutex poisoned") =
                            Some(TransportMode::EventStream);
                        response
                    }
                    Err(fallback_err) => {
                        return Err(UpstreamError::ConnectionFailed(format!(
                            "streamable POST failed ({streamable_err}); event-stream fallback failed ({fallback_err})"
                        )));
                    }
                }
            }
        };

        let result: InitializeResult = response
            .into_result()
            .map_err(|e| UpstreamError::upstream(e.code, e.message))
            .and_then(|v| serde_json::from_value(v).map_err(UpstreamError::from))?;

        *self.capabilities.lock().expect("capabilities mutex poisoned") =
            Some(result.capabilities.clone());
        *self.server_info.lock().expect("server info mutex poisoned") =
            Some(result.server_info.clone());
        self.initialized.store(true, Ordering::SeqCst);

        trace!(url = %self.config.url, "http upstream initialized");
        Ok(result)
    }

    async fn list_tools(
        &self,
        ct: CancellationToken,
        cursor: Option<String>,
    ) -> UpstreamResult<Page<ToolDescriptor>> {
        let params = match cursor {
            Some(c) => serde_json::json!({ "cursor": c }),
            None => Value::Null,
        };
        let result = self.call(&ct, "tools/list", params).await?;
        decode_page(result, "tools")
    }

    async fn call_tool(
        &self,
        ct: CancellationToken,
        name: &str,
        arguments: Value,
    ) -> UpstreamResult<Value> {
        self.call(
            &ct,
            "tools/call",
            serde_json::json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    async fn list_resources(
        &self,
        ct: CancellationToken,
        cursor: Option<String>,
    ) -> UpstreamResult<Page<ResourceDescriptor>> {
        let params = match cursor {
            Some(c) => serde_json::json!({ "cursor": c }),
            None => Value::Null,
        };
        let result = self.call(&ct, "resources/list", params).await?;
        decode_page(result, "resources")
    }

    async fn read_resource(&self, ct: CancellationToken, uri: &str) -> UpstreamResult<Value> {
        self.call(&ct, "resources/read", serde_json::json!({ "uri": uri }))
            .await
    }

    async fn list_prompts(
        &self,
        ct: CancellationToken,
        cursor: Option<String>,
    ) -> UpstreamResult<Page<PromptDescriptor>> {
        let params = match cursor {
            Some(c) => serde_json::json!({ "cursor": c }),
            None => Value::Null,
        };
        let result = self.call(&ct, "prompts/list", params).await?;
        decode_page(result, "prompts")
    }

    async fn get_prompt(
        &self,
        ct: CancellationToken,
        name: &str,
        arguments: Option<Value>,
    ) -> UpstreamResult<Value> {
        let mut params = serde_json::json!({ "name": name });
        if let Some(args) = arguments {
            params["arguments"] = args;
        }
        self.call(&ct, "prompts/get", params).await
    }

    async fn send_raw(
        &self,
        ct: CancellationToken,
        mut request: JsonRpcRequest,
    ) -> UpstreamResult<JsonRpcResponse> {
        request.id = self.next_request_id();
        self.send(request, &ct).await
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.lock().expect("capabilities mutex poisoned").clone()
    }

    fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().expect("server info mutex poisoned").clone()
    }

    async fn close(&self) -> UpstreamResult<()> {
        self.dead.store(true, Ordering::SeqCst);
        self.pending.drain_with_error();
        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

fn decode_page<T: serde::de::DeserializeOwned>(
    result: Value,
    items_key: &str,
) -> UpstreamResult<Page<T>> {
    let items = result
        .get(items_key)
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));
    let items: Vec<T> = serde_json::from_value(items)?;
    let next_cursor = result
        .get("nextCursor")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Ok(Page { items, next_cursor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_first_message_event_from_sse_body() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"result\":{},\"id\":1}\n\nevent: message\ndata: {\"jsonrpc\":\"2.0\",\"result\":{},\"id\":2}\n\n";
        let response = parse_first_message_event(body).unwrap();
        assert_eq!(response.id, Some(RequestId::Number(1)));
    }

    #[test]
    fn rejects_body_with_no_message_event() {
        let body = "event: ping\ndata: keepalive\n\n";
        assert!(parse_first_message_event(body).is_err());
    }

    fn init_params() -> InitializeParams {
        InitializeParams {
            protocol_version: mcpgw_wire::MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(Default::default()),
            client_info: ServerInfo {
                name: "mcpgw-test".to_string(),
                version: "0.0.0".to_string(),
            },
        }
    }

    /// §4.C transport auto-detection: a 200 JSON response keeps the client
    /// in streamable mode for every subsequent call.
    #[tokio::test]
    async fn initialize_detects_streamable_json_mode() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "protocolVersion": mcpgw_wire::MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "serverInfo": {"name": "fake-upstream", "version": "1.0"},
            }
        });
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(HttpUpstreamConfig {
            url: Url::parse(&server.uri()).unwrap(),
            ..HttpUpstreamConfig::default()
        })
        .unwrap();

        let result = client
            .initialize(CancellationToken::new(), init_params())
            .await
            .unwrap();
        assert_eq!(result.server_info.name, "fake-upstream");
        assert!(client.is_initialized());
        assert_eq!(*client.mode.lock().unwrap(), Some(TransportMode::Streamable));
    }

    /// The upstream's `Mcp-Session-Id` response header is captured and
    /// echoed on every subsequent outbound request (spec §4.C).
    #[tokio::test]
    async fn session_header_is_captured_and_echoed() {
        let server = MockServer::start().await;
        let init_body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "protocolVersion": mcpgw_wire::MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "serverInfo": {"name": "fake-upstream", "version": "1.0"},
            }
        });
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(&init_body)
                    .insert_header("Mcp-Session-Id", "sess-abc"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let list_body = serde_json::json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": []}});
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("Mcp-Session-Id", "sess-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&list_body))
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(HttpUpstreamConfig {
            url: Url::parse(&server.uri()).unwrap(),
            ..HttpUpstreamConfig::default()
        })
        .unwrap();
        client
            .initialize(CancellationToken::new(), init_params())
            .await
            .unwrap();
        let page = client.list_tools(CancellationToken::new(), None).await.unwrap();
        assert!(page.items.is_empty());
    }

    /// Bearer auth (spec §4.C authorization headers) is written on every
    /// outbound request once configured.
    #[tokio::test]
    async fn bearer_auth_header_is_sent() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "protocolVersion": mcpgw_wire::MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "serverInfo": {"name": "fake-upstream", "version": "1.0"},
            }
        });
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("Authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(HttpUpstreamConfig {
            url: Url::parse(&server.uri()).unwrap(),
            auth: UpstreamAuth::Bearer(secrecy::SecretString::from("secret-token".to_string())),
            ..HttpUpstreamConfig::default()
        })
        .unwrap();
        client
            .initialize(CancellationToken::new(), init_params())
            .await
            .unwrap();
    }

    /// A non-success status on the initial POST and no event-stream
    /// fallback path available reports a combined failure naming both
    /// attempts (spec §4.C).
    #[tokio::test]
    async fn initialize_fails_with_combined_error_when_both_paths_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(HttpUpstreamConfig {
            url: Url::parse(&server.uri()).unwrap(),
            ..HttpUpstreamConfig::default()
        })
        .unwrap();
        let err = client
            .initialize(CancellationToken::new(), init_params())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("streamable POST failed"));
        assert!(message.contains("event-stream fallback failed"));
    }
}
