//! The container-instance manager (spec §4.G): same contract as the
//! process manager, over a remote custom-resource/pod/service instead of a
//! local child process. The operator that reconciles the custom resource
//! into a pod plus service is explicitly out of scope (spec §1) — the core
//! only creates/deletes the resource and polls readiness through
//! [`ContainerResourceController`], which a deployment wires up to its own
//! Kubernetes client.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use url::Url;

use crate::error::{InstanceError, InstanceResult};
use crate::manager::{InstanceManager, InstanceManagerConfig, ManagedInstance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Pending,
    Running,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub port: u16,
    pub health_probe_path: Option<String>,
    pub command: Option<Vec<String>>,
    /// Resolved env config, decrypted, written into a Secret-like object by
    /// the controller (spec §4.E).
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ContainerDescriptor {
    pub subject_key: String,
    pub url: Option<Url>,
}

/// The external interface the core consumes for container lifetime; a real
/// deployment implements this against a Kubernetes custom resource
/// controller (spec §1: "the operator... is out of scope; the core only
/// creates/deletes the resource and polls readiness").
#[async_trait]
pub trait ContainerResourceController: Send + Sync {
    async fn ensure(&self, spec: &ContainerSpec) -> InstanceResult<ContainerDescriptor>;
    async fn poll_status(&self, descriptor: &ContainerDescriptor) -> InstanceResult<ContainerStatus>;
    async fn delete(&self, descriptor: &ContainerDescriptor) -> InstanceResult<()>;
}

pub struct ManagedContainer {
    descriptor: ContainerDescriptor,
    controller: Arc<dyn ContainerResourceController>,
    last_status: AsyncMutex<ContainerStatus>,
}

impl ManagedContainer {
    pub fn url(&self) -> Option<Url> {
        self.descriptor.url.clone()
    }
}

#[async_trait]
impl ManagedInstance for ManagedContainer {
    async fn is_alive(&self) -> bool {
        match self.controller.poll_status(&self.descriptor).await {
            Ok(status) => {
                *self.last_status.lock().await = status;
                status != ContainerStatus::Failed
            }
            Err(_) => false,
        }
    }

    async fn close(&self) {
        if let Err(e) = self.controller.delete(&self.descriptor).await {
            tracing::warn!("error deleting container resource: {e}");
        }
    }
}

pub type ContainerManager = InstanceManager<ManagedContainer>;

pub fn new_container_manager(config: InstanceManagerConfig) -> ContainerManager {
    InstanceManager::new(config)
}

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Ensure a container instance for `subject_key`, polling readiness with
/// backoff up to `readiness_timeout` (spec §4.E, §4.G).
pub async fn get_or_create_container(
    manager: &ContainerManager,
    controller: Arc<dyn ContainerResourceController>,
    subject_key: &str,
    spec: ContainerSpec,
    readiness_timeout: Duration,
) -> InstanceResult<Arc<ManagedContainer>> {
    manager
        .get_or_create(subject_key, || async {
            let descriptor = controller.ensure(&spec).await?;
            wait_for_ready(controller.as_ref(), &descriptor, readiness_timeout).await?;
            Ok(ManagedContainer {
                descriptor,
                controller,
                last_status: AsyncMutex::new(ContainerStatus::Ready),
            })
        })
        .await
}

async fn wait_for_ready(
    controller: &dyn ContainerResourceController,
    descriptor: &ContainerDescriptor,
    timeout: Duration,
) -> InstanceResult<()> {
    let deadline = Instant::now() + timeout;
    let mut backoff = Duration::from_millis(50);
    loop {
        match controller.poll_status(descriptor).await? {
            ContainerStatus::Ready => return Ok(()),
            ContainerStatus::Failed => {
                return Err(InstanceError::Controller(format!(
                    "container instance for {} failed to start",
                    descriptor.subject_key
                )));
            }
            ContainerStatus::Pending | ContainerStatus::Running => {}
        }
        if Instant::now() >= deadline {
            return Err(InstanceError::NotReady);
        }
        sleep(backoff.min(READY_POLL_INTERVAL.max(backoff))).await;
        backoff = (backoff * 2).min(Duration::from_secs(2));
    }
}

/// `restart-target(targetName)`: delete every running instance for a
/// target and report how many were removed; callers key instances by
/// subject key, so this takes a predicate over keys (spec §4.G).
pub async fn restart_target(
    manager: &ContainerManager,
    belongs_to_target: impl Fn(&str) -> bool,
) -> usize {
    let keys: Vec<String> = manager
        .snapshot_keys()
        .await
        .into_iter()
        .filter(|k| belongs_to_target(k))
        .collect();
    let mut removed = 0;
    for key in keys {
        if manager.remove_and_close(&key).await {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeController {
        ready_after_polls: usize,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl ContainerResourceController for FakeController {
        async fn ensure(&self, spec: &ContainerSpec) -> InstanceResult<ContainerDescriptor> {
            Ok(ContainerDescriptor {
                subject_key: "shared:t1".to_string(),
                url: Url::parse(&format!("http://{}", spec.image)).ok(),
            })
        }

        async fn poll_status(&self, _descriptor: &ContainerDescriptor) -> InstanceResult<ContainerStatus> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if n >= self.ready_after_polls {
                Ok(ContainerStatus::Ready)
            } else {
                Ok(ContainerStatus::Pending)
            }
        }

        async fn delete(&self, _descriptor: &ContainerDescriptor) -> InstanceResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn get_or_create_waits_for_readiness() {
        let manager = new_container_manager(InstanceManagerConfig {
            max_instances: 4,
            idle_ttl: Duration::from_secs(3600),
            max_lifetime: Duration::from_secs(3600),
            gc_interval: Duration::from_secs(3600),
        });
        let controller = Arc::new(FakeController {
            ready_after_polls: 2,
            polls: AtomicUsize::new(0),
        });
        let spec = ContainerSpec {
            image: "localhost:1234".to_string(),
            port: 80,
            health_probe_path: None,
            command: None,
            env: vec![],
        };
        let instance = get_or_create_container(
            &manager,
            controller,
            "shared:t1",
            spec,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(instance.url().is_some());
    }
}
