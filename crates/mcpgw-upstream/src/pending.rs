//! The correlated-response-routing pattern shared by the HTTP client's
//! event-stream mode and the child-process client (spec §9): a pending
//! request table keyed by id, a background reader that publishes to
//! per-id single-use response slots, and the caller registering a slot
//! before sending.

use mcpgw_wire::{JsonRpcResponse, RequestId};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

use crate::error::UpstreamError;

#[derive(Default)]
pub struct PendingTable {
    slots: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rendezvous slot for `id` before the request is sent, so
    /// no response can race ahead of registration.
    pub fn register(&self, id: RequestId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.slots
            .lock()
            .expect("pending table mutex poisoned")
            .insert(id, tx);
        rx
    }

    pub fn unregister(&self, id: &RequestId) {
        self.slots
            .lock()
            .expect("pending table mutex poisoned")
            .remove(id);
    }

    /// Called by the background reader on each decoded response.
    pub fn dispatch(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.clone() else {
            return;
        };
        let sender = self
            .slots
            .lock()
            .expect("pending table mutex poisoned")
            .remove(&id);
        if let Some(sender) = sender {
            // Receiver may already be gone if the caller was cancelled; that's fine.
            let _ = sender.send(response);
        }
    }

    /// Called when the transport dies: every still-pending waiter resolves
    /// with a `transport-dead` error instead of hanging forever.
    pub fn drain_with_error(&self) {
        let pending: Vec<_> = self
            .slots
            .lock()
            .expect("pending table mutex poisoned")
            .drain()
            .collect();
        for (id, sender) in pending {
            let error = UpstreamError::transport_dead(format!(
                "transport closed while request {id} was in flight"
            ));
            let response = JsonRpcResponse::error(
                mcpgw_wire::JsonRpcError::new(-32002, error.to_string()),
                Some(id),
            );
            let _ = sender.send(response);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("pending table mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_resolves_registered_slot() {
        let table = PendingTable::new();
        let rx = table.register(RequestId::Number(1));
        table.dispatch(JsonRpcResponse::success(
            serde_json::json!({"ok": true}),
            RequestId::Number(1),
        ));
        let response = rx.await.unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn drain_resolves_all_pending_with_error() {
        let table = PendingTable::new();
        let rx1 = table.register(RequestId::Number(1));
        let rx2 = table.register(RequestId::Number(2));
        table.drain_with_error();
        assert!(!rx1.await.unwrap().is_success());
        assert!(!rx2.await.unwrap().is_success());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn dispatch_to_unknown_id_is_a_noop() {
        let table = PendingTable::new();
        table.dispatch(JsonRpcResponse::success(
            serde_json::Value::Null,
            RequestId::Number(99),
        ));
        assert!(table.is_empty());
    }
}
