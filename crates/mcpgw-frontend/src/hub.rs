//! Server-to-client push channels for the notification-stream verb (spec
//! §4.L GET). One broadcast channel per gateway session id; the stream
//! handler subscribes a receiver and holds the HTTP connection open until
//! the client disconnects or the channel closes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Default)]
pub struct NotificationHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, session_id: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.write().await;
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub async fn close(&self, session_id: &str) {
        self.channels.write().await.remove(session_id);
    }
}
