//! The process manager (spec §4.F): `InstanceManager<ManagedProcess>`
//! specialized to child-process upstream clients.

use async_trait::async_trait;
use mcpgw_upstream::{ProcessUpstreamClient, ProcessUpstreamConfig};
use std::sync::Arc;

use crate::error::{InstanceError, InstanceResult};
use crate::manager::{InstanceManager, InstanceManagerConfig, ManagedInstance};

pub struct ManagedProcess {
    client: Arc<ProcessUpstreamClient>,
}

impl ManagedProcess {
    pub fn client(&self) -> Arc<ProcessUpstreamClient> {
        Arc::clone(&self.client)
    }
}

#[async_trait]
impl ManagedInstance for ManagedProcess {
    async fn is_alive(&self) -> bool {
        !self.client.is_dead()
    }

    async fn close(&self) {
        if let Err(e) = self.client.close().await {
            tracing::warn!("error closing process upstream client: {e}");
        }
    }
}

pub type ProcessManager = InstanceManager<ManagedProcess>;

pub fn new_process_manager(config: InstanceManagerConfig) -> ProcessManager {
    InstanceManager::new(config)
}

/// Convenience wrapper matching spec §4.F's `get-or-create(subjectKey, cfg)`.
pub async fn get_or_create_process(
    manager: &ProcessManager,
    subject_key: &str,
    cfg: ProcessUpstreamConfig,
) -> InstanceResult<Arc<ProcessUpstreamClient>> {
    let managed = manager
        .get_or_create(subject_key, || async {
            let client = ProcessUpstreamClient::spawn(cfg)
                .await
                .map_err(|e| InstanceError::SpawnFailed(e.to_string()))?;
            Ok(ManagedProcess {
                client: Arc::new(client),
            })
        })
        .await?;
    Ok(managed.client())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> InstanceManagerConfig {
        InstanceManagerConfig {
            max_instances: 4,
            idle_ttl: Duration::from_secs(3600),
            max_lifetime: Duration::from_secs(3600),
            gc_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn get_or_create_spawns_once_per_key() {
        let manager = new_process_manager(config());
        let cfg = ProcessUpstreamConfig {
            command: "cat".to_string(),
            args: vec![],
            env: vec![],
        };
        let a = get_or_create_process(&manager, "shared:t1", cfg.clone())
            .await
            .unwrap();
        let b = get_or_create_process(&manager, "shared:t1", cfg)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        manager.shutdown().await;
    }
}
