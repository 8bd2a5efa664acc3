//! Child-process upstream client: line-delimited JSON-RPC over stdio
//! (spec §4.D).

use async_trait::async_trait;
use mcpgw_wire::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    PromptDescriptor, RequestId, ResourceDescriptor, ServerCapabilities, ServerInfo,
    ToolDescriptor,
};
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::client::{Page, UpstreamClient, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{UpstreamError, UpstreamResult};
use crate::pending::PendingTable;

const MAX_LINE_LENGTH: usize = 10 * 1024 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ProcessUpstreamConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Process-inherited variables plus resolved env config plus, if the
    /// target has auth, `AUTH_TOKEN` (spec §4.D) — fully resolved before
    /// construction, this crate does no merging of its own.
    pub env: Vec<(String, String)>,
}

pub struct ProcessUpstreamClient {
    child: AsyncMutex<Option<Child>>,
    stdin_tx: AsyncMutex<Option<mpsc::Sender<String>>>,
    pending: Arc<PendingTable>,
    dead: Arc<AtomicBool>,
    next_id: AtomicU64,
    initialized: AtomicBool,
    capabilities: Mutex<Option<ServerCapabilities>>,
    server_info: Mutex<Option<ServerInfo>>,
    command: String,
}

impl std::fmt::Debug for ProcessUpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessUpstreamClient")
            .field("command", &self.command)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .field("dead", &self.dead.load(Ordering::Relaxed))
            .finish()
    }
}

impl ProcessUpstreamClient {
    pub async fn spawn(config: ProcessUpstreamConfig) -> UpstreamResult<Self> {
        if config.command.is_empty() {
            return Err(UpstreamError::Configuration("command cannot be empty".into()));
        }

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| UpstreamError::ConnectionFailed(format!("spawning {}: {e}", config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| UpstreamError::ConnectionFailed("no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| UpstreamError::ConnectionFailed("no stdout handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| UpstreamError::ConnectionFailed("no stderr handle".into()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(64);
        tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            while let Some(line) = stdin_rx.recv().await {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!("failed writing to child stdin: {e}");
                    break;
                }
                if let Err(e) = writer.write_all(b"\n").await {
                    error!("failed writing newline to child stdin: {e}");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!("failed flushing child stdin: {e}");
                    break;
                }
                trace!("wrote message to child stdin: {line}");
            }
            debug!("stdin writer task ending");
        });

        let pending = Arc::new(PendingTable::new());
        let dead = Arc::new(AtomicBool::new(false));

        {
            let pending = Arc::clone(&pending);
            let dead = Arc::clone(&dead);
            tokio::spawn(async move {
                let reader = BufReader::new(stdout);
                let mut lines = reader.lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if line.len() > MAX_LINE_LENGTH {
                                warn!("dropping oversized line from child stdout: {} bytes", line.len());
                                continue;
                            }
                            match serde_json::from_str::<JsonRpcResponse>(&line) {
                                Ok(response) => pending.dispatch(response),
                                Err(_) => debug!("skipping non-JSON-RPC line from child stdout"),
                            }
                        }
                        Ok(None) => {
                            debug!("child stdout closed");
                            break;
                        }
                        Err(e) => {
                            error!("error reading child stdout: {e}");
                            break;
                        }
                    }
                }
                dead.store(true, Ordering::SeqCst);
                pending.drain_with_error();
            });
        }

        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("child stderr: {line}");
            }
        });

        Ok(Self {
            child: AsyncMutex::new(Some(child)),
            stdin_tx: AsyncMutex::new(Some(stdin_tx)),
            pending,
            dead,
            next_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
            capabilities: Mutex::new(None),
            server_info: Mutex::new(None),
            command: config.command,
        })
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst) as i64)
    }

    /// Whether the reader task has observed the process's stdout close or
    /// error. Consulted by the process manager's GC loop (spec §4.F).
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        request: JsonRpcRequest,
        ct: &CancellationToken,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(UpstreamError::transport_dead("child process is dead"));
        }
        let serialized = serde_json::to_string(&request)?;
        let rx = self.pending.register(request.id.clone());

        let sender = {
            let guard = self.stdin_tx.lock().await;
            guard.clone()
        };
        let Some(sender) = sender else {
            self.pending.unregister(&request.id);
            return Err(UpstreamError::transport_dead("stdin channel closed"));
        };
        if sender.send(serialized).await.is_err() {
            self.pending.unregister(&request.id);
            return Err(UpstreamError::transport_dead("stdin channel closed"));
        }

        // Races the correlated reply against the per-request wall-clock
        // timeout and the caller's cancellation, unregistering the
        // rendezvous slot on either losing path (spec §4.B, §5, §9).
        tokio::select! {
            result = rx => result.map_err(|_| UpstreamError::transport_dead("response slot dropped")),
            _ = tokio::time::sleep(DEFAULT_REQUEST_TIMEOUT) => {
                self.pending.unregister(&request.id);
                Err(UpstreamError::Timeout(DEFAULT_REQUEST_TIMEOUT))
            }
            _ = ct.cancelled() => {
                self.pending.unregister(&request.id);
                Err(UpstreamError::Cancelled)
            }
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

#[async_trait]
impl UpstreamClient for ProcessUpstreamClient {
    async fn initialize(
        &self,
        ct: CancellationToken,
        params: InitializeParams,
    ) -> UpstreamResult<InitializeResult> {
        let result = self
            .call(&ct, "initialize", serde_json::to_value(&params)?)
            .await
            .and_then(|v| serde_json::from_value(v).map_err(UpstreamError::from))?;
        let result: InitializeResult = result;

        *self.capabilities.lock().expect("capabilities mutex poisoned") =
            Some(result.capabilities.clone());
        *self.server_info.lock().expect("server info mutex poisoned") =
            Some(result.server_info.clone());
        self.initialized.store(true, Ordering::SeqCst);
        Ok(result)
    }

    async fn list_tools(
        &self,
        ct: CancellationToken,
        cursor: Option<String>,
    ) -> UpstreamResult<Page<ToolDescriptor>> {
        let params = cursor.map_or(Value::Null, |c| serde_json::json!({ "cursor": c }));
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
        let params = cursor.map_or(Value::Null, |c| serde_json::json!({ "cursor": c }));
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
        let params = cursor.map_or(Value::Null, |c| serde_json::json!({ "cursor": c }));
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
        self.stdin_tx.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            match timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("child process {} exited with {status}", self.command),
                Ok(Err(e)) => error!("error waiting for child process exit: {e}"),
                Err(_) => {
                    warn!("child process {} did not exit in time, killing", self.command);
                    let _ = child.kill().await;
                }
            }
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

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let config = ProcessUpstreamConfig {
            command: String::new(),
            args: vec![],
            env: vec![],
        };
        let result = ProcessUpstreamClient::spawn(config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn spawn_and_close_cat() {
        let config = ProcessUpstreamConfig {
            command: "cat".to_string(),
            args: vec![],
            env: vec![],
        };
        let client = ProcessUpstreamClient::spawn(config).await.unwrap();
        assert!(!client.is_initialized());
        client.close().await.unwrap();
    }
}
