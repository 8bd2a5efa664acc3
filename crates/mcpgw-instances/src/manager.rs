//! A subject-key→instance map with at-most-one-per-key, a capacity limit,
//! and idle-TTL/max-lifetime garbage collection — the contract the process
//! manager (§4.F) and the container-instance manager (§4.G) both implement
//! over different concrete instance types.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{InstanceError, InstanceResult};

/// What the manager needs to know about an instance to garbage-collect it.
/// Implemented by a thin wrapper around `ProcessUpstreamClient` for the
/// process manager and around a container resource descriptor for the
/// container-instance manager.
#[async_trait]
pub trait ManagedInstance: Send + Sync {
    async fn is_alive(&self) -> bool;
    async fn close(&self);
}

#[derive(Debug, Clone)]
pub struct InstanceManagerConfig {
    pub max_instances: usize,
    pub idle_ttl: Duration,
    pub max_lifetime: Duration,
    pub gc_interval: Duration,
}

struct Entry<T> {
    instance: Arc<T>,
    started_at: Instant,
    last_used: Instant,
}

/// Generic subject-keyed instance manager (spec §4.F, reused verbatim by
/// §4.G per "same interface as 4.F").
pub struct InstanceManager<T: ManagedInstance + 'static> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    config: InstanceManagerConfig,
}

impl<T: ManagedInstance + 'static> InstanceManager<T> {
    pub fn new(config: InstanceManagerConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Under a single lock: return the live entry for `subject_key` if one
    /// exists, removing it first if it has died; otherwise, if under
    /// capacity, construct a new one with `create` and insert it. The
    /// spawn happens while the lock is held — acceptable because concurrent
    /// creations for distinct keys are rare and spawning is fast relative
    /// to the idle TTL (spec §4.F).
    pub async fn get_or_create<F, Fut>(
        &self,
        subject_key: &str,
        create: F,
    ) -> InstanceResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = InstanceResult<T>>,
    {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(subject_key) {
            if entry.instance.is_alive().await {
                let instance = Arc::clone(&entry.instance);
                drop(entries);
                self.touch(subject_key).await;
                return Ok(instance);
            }
        }
        entries.remove(subject_key);

        if entries.len() >= self.config.max_instances {
            return Err(InstanceError::CapacityExceeded(entries.len()));
        }

        let instance = Arc::new(create().await?);
        let now = Instant::now();
        entries.insert(
            subject_key.to_string(),
            Entry {
                instance: Arc::clone(&instance),
                started_at: now,
                last_used: now,
            },
        );
        Ok(instance)
    }

    /// Update `lastUsed` for a subject key; called on every request routed
    /// through the instance (spec §4.F).
    pub async fn touch(&self, subject_key: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(subject_key) {
            entry.last_used = Instant::now();
        }
    }

    pub async fn live_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn snapshot_keys(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    /// Remove and close a single entry by key, if present. Returns whether
    /// an entry was found (spec §4.G `restart-target`).
    pub async fn remove_and_close(&self, subject_key: &str) -> bool {
        let entry = self.entries.lock().await.remove(subject_key);
        match entry {
            Some(entry) => {
                entry.instance.close().await;
                true
            }
            None => false,
        }
    }

    async fn gc_once(&self) {
        let mut to_close = Vec::new();
        {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            let mut dead_keys = Vec::new();
            for (key, entry) in entries.iter() {
                if !entry.instance.is_alive().await {
                    dead_keys.push(key.clone());
                } else if now.duration_since(entry.last_used) > self.config.idle_ttl {
                    debug!(subject_key = %key, "reaping idle instance");
                    to_close.push((key.clone(), Arc::clone(&entry.instance)));
                } else if now.duration_since(entry.started_at) > self.config.max_lifetime {
                    debug!(subject_key = %key, "reaping instance past max lifetime");
                    to_close.push((key.clone(), Arc::clone(&entry.instance)));
                }
            }
            for key in dead_keys {
                entries.remove(&key);
            }
            for (key, _) in &to_close {
                entries.remove(key);
            }
        }
        for (_, instance) in to_close {
            instance.close().await;
        }
    }

    /// Spawn the GC loop. Terminates on `ct` cancellation (spec §9
    /// cooperative cancellation).
    pub fn spawn_gc_loop(self: &Arc<Self>, ct: CancellationToken) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = self.config.gc_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ct.cancelled() => {
                        debug!("instance manager gc loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.gc_once().await;
                    }
                }
            }
        })
    }

    /// Close every entry and drain the map (spec §4.F shutdown).
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.entries.lock().await.drain().collect();
        for (key, entry) in drained {
            warn!(subject_key = %key, "closing instance on shutdown");
            entry.instance.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeInstance {
        alive: AtomicBool,
        closed: AtomicBool,
    }

    #[async_trait]
    impl ManagedInstance for FakeInstance {
        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    fn config() -> InstanceManagerConfig {
        InstanceManagerConfig {
            max_instances: 2,
            idle_ttl: Duration::from_secs(3600),
            max_lifetime: Duration::from_secs(3600),
            gc_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn get_or_create_returns_same_instance_for_same_key() {
        let manager: InstanceManager<FakeInstance> = InstanceManager::new(config());
        let created = AtomicUsize::new(0);
        let make = || async {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(FakeInstance {
                alive: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            })
        };
        let a = manager.get_or_create("k1", make).await.unwrap();
        let b = manager
            .get_or_create("k1", || async {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(FakeInstance {
                    alive: AtomicBool::new(true),
                    closed: AtomicBool::new(false),
                })
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn capacity_limit_is_enforced() {
        let manager: InstanceManager<FakeInstance> = InstanceManager::new(config());
        for i in 0..2 {
            manager
                .get_or_create(&format!("k{i}"), || async {
                    Ok(FakeInstance {
                        alive: AtomicBool::new(true),
                        closed: AtomicBool::new(false),
                    })
                })
                .await
                .unwrap();
        }
        let result = manager
            .get_or_create("k-overflow", || async {
                Ok(FakeInstance {
                    alive: AtomicBool::new(true),
                    closed: AtomicBool::new(false),
                })
            })
            .await;
        assert!(matches!(result, Err(InstanceError::CapacityExceeded(2))));
    }

    #[tokio::test]
    async fn dead_entry_is_replaced_not_reused() {
        let manager: InstanceManager<FakeInstance> = InstanceManager::new(config());
        let first = manager
            .get_or_create("k1", || async {
                Ok(FakeInstance {
                    alive: AtomicBool::new(false),
                    closed: AtomicBool::new(false),
                })
            })
            .await
            .unwrap();
        let second = manager
            .get_or_create("k1", || async {
                Ok(FakeInstance {
                    alive: AtomicBool::new(true),
                    closed: AtomicBool::new(false),
                })
            })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn shutdown_closes_every_entry() {
        let manager: InstanceManager<FakeInstance> = InstanceManager::new(config());
        let instance = manager
            .get_or_create("k1", || async {
                Ok(FakeInstance {
                    alive: AtomicBool::new(true),
                    closed: AtomicBool::new(false),
                })
            })
            .await
            .unwrap();
        manager.shutdown().await;
        assert!(instance.closed.load(Ordering::SeqCst));
        assert_eq!(manager.live_count().await, 0);
    }
}
