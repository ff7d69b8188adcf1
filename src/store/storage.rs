//! Durable string slots shared by every store in the process, with change
//! events that behave like a browser's `storage` event: a write is announced
//! to every other attached handle but never echoed back to the writer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::Database;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const EVENT_CAPACITY: usize = 64;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn write(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    /// Opaque value that changes when someone outside this process writes.
    /// `None` when the backend cannot be shared across processes.
    async fn change_marker(&self) -> Result<Option<i64>>;
}

#[derive(Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.slots
            .lock()
            .map_err(|_| anyhow!("memory storage lock poisoned"))
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.slots()?.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.slots()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.slots()?.remove(key);
        Ok(())
    }

    async fn change_marker(&self) -> Result<Option<i64>> {
        Ok(None)
    }
}

#[async_trait]
impl StorageBackend for Database {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        self.get_slot(key).await
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.put_slot(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.delete_slot(key).await
    }

    async fn change_marker(&self) -> Result<Option<i64>> {
        self.data_version().await.map(Some)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the slot was removed.
    pub new_value: Option<String>,
    /// Handle that wrote it; `None` for writes from another process.
    pub origin: Option<Uuid>,
}

#[derive(Clone)]
pub struct SharedStorage {
    backend: Arc<dyn StorageBackend>,
    events: broadcast::Sender<StorageEvent>,
}

impl SharedStorage {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { backend, events }
    }

    /// A new writer identity over the same slots.
    pub fn attach(&self) -> StorageHandle {
        StorageHandle {
            shared: self.clone(),
            origin: Uuid::new_v4(),
        }
    }

    /// Polls the backend's change marker and re-announces `keys` whenever it
    /// moves, so stores in this process see writes made by other processes.
    pub async fn watch_external(&self, keys: Vec<String>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_marker: Option<i64> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let marker = match self.backend.change_marker().await {
                        Ok(Some(marker)) => marker,
                        Ok(None) => {
                            log_debug!("storage backend is process-local; nothing to watch");
                            return;
                        }
                        Err(err) => {
                            log_warn!("failed to read storage change marker: {err:#}");
                            continue;
                        }
                    };

                    let changed = last_marker.map_or(false, |last| last != marker);
                    last_marker = Some(marker);
                    if !changed {
                        continue;
                    }

                    for key in &keys {
                        match self.backend.read(key).await {
                            Ok(new_value) => {
                                log_debug!("external change to '{key}'");
                                let _ = self.events.send(StorageEvent {
                                    key: key.clone(),
                                    new_value,
                                    origin: None,
                                });
                            }
                            Err(err) => log_warn!("failed to re-read '{key}': {err:#}"),
                        }
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }
}

/// One writer's view of the shared slots.
#[derive(Clone)]
pub struct StorageHandle {
    shared: SharedStorage,
    origin: Uuid,
}

impl StorageHandle {
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub async fn read(&self, key: &str) -> Result<Option<String>> {
        self.shared.backend.read(key).await
    }

    pub async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.shared.backend.write(key, value).await?;
        self.announce(key, Some(value.to_string()));
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.shared.backend.remove(key).await?;
        self.announce(key, None);
        Ok(())
    }

    /// Changes made by everyone but this handle.
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents {
            receiver: self.shared.events.subscribe(),
            origin: self.origin,
        }
    }

    fn announce(&self, key: &str, new_value: Option<String>) {
        // No receivers is fine.
        let _ = self.shared.events.send(StorageEvent {
            key: key.to_string(),
            new_value,
            origin: Some(self.origin),
        });
    }
}

pub struct StorageEvents {
    receiver: broadcast::Receiver<StorageEvent>,
    origin: Uuid,
}

impl StorageEvents {
    pub async fn recv(&mut self) -> Result<StorageEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.origin != Some(self.origin) {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Backend whose writes always fail; reads see whatever was seeded.
    #[derive(Default)]
    pub(crate) struct BrokenStorage {
        pub seeded: Option<String>,
    }

    #[async_trait]
    impl StorageBackend for BrokenStorage {
        async fn read(&self, _key: &str) -> Result<Option<String>> {
            Ok(self.seeded.clone())
        }

        async fn write(&self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow!("quota exceeded"))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(anyhow!("quota exceeded"))
        }

        async fn change_marker(&self) -> Result<Option<i64>> {
            Ok(None)
        }
    }
}
