//! The scan log: newest-first, capacity-bounded, persisted in one slot and
//! kept in step with every other writer of that slot by last-write-wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast::error::RecvError, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{clamp01, ScanCandidate, ScanDetection, ScanRecord, ScanSource, WasteBin, UNKNOWN_LABEL};
use crate::utils::coerce::{lenient_list, lenient_number, lenient_text};

use super::storage::StorageHandle;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const STORAGE_KEY: &str = "ecosort.scans.v1";
pub const DEFAULT_CAPACITY: usize = 200;

pub type ScanLogSnapshot = Arc<Vec<ScanRecord>>;

pub struct ScanLogStore {
    storage: StorageHandle,
    capacity: usize,
    log: watch::Sender<ScanLogSnapshot>,
    /// Serializes read-modify-write cycles on the slot.
    write_lock: Mutex<()>,
    hydrated: AtomicBool,
}

impl ScanLogStore {
    /// Starts empty; nothing is read until [`ScanLogStore::hydrate`].
    pub fn new(storage: StorageHandle, capacity: usize) -> Self {
        let (log, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            storage,
            capacity: capacity.max(1),
            log,
            write_lock: Mutex::new(()),
            hydrated: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Loads the persisted log. Only the first call reads.
    pub async fn hydrate(&self) {
        let _guard = self.write_lock.lock().await;
        self.hydrate_locked().await;
    }

    async fn hydrate_locked(&self) {
        if self.hydrated.swap(true, Ordering::AcqRel) {
            return;
        }
        let records = self.read_persisted().await;
        log_info!("scan log hydrated with {} record(s)", records.len());
        self.log.send_replace(Arc::new(records));
    }

    async fn read_persisted(&self) -> Vec<ScanRecord> {
        match self.storage.read(STORAGE_KEY).await {
            Ok(Some(raw)) => parse_scan_log(&raw, self.capacity),
            Ok(None) => Vec::new(),
            Err(err) => {
                log_warn!("failed to read scan log: {err:#}");
                Vec::new()
            }
        }
    }

    /// Prepends a record, stamping `id`/`timestamp` when the candidate has
    /// none, and evicts the oldest beyond capacity. A failed write is logged
    /// and the in-memory log still moves on.
    pub async fn append(&self, candidate: ScanCandidate) -> ScanRecord {
        let _guard = self.write_lock.lock().await;
        self.hydrate_locked().await;

        let record = candidate.into_record();
        let current = self.all();
        let mut next = Vec::with_capacity((current.len() + 1).min(self.capacity));
        next.push(record.clone());
        next.extend(current.iter().take(self.capacity - 1).cloned());

        self.persist(&next).await;
        self.log.send_replace(Arc::new(next));
        log_debug!("appended scan {} ({})", record.id, record.waste_type);
        record
    }

    pub async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        self.hydrated.store(true, Ordering::Release);

        if let Err(err) = self.storage.remove(STORAGE_KEY).await {
            log_warn!("failed to clear persisted scan log: {err:#}");
        }
        self.log.send_replace(Arc::new(Vec::new()));
    }

    /// Current log, newest first.
    pub fn all(&self) -> ScanLogSnapshot {
        self.log.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanLogSnapshot> {
        self.log.subscribe()
    }

    /// Someone else wrote the slot: their value replaces ours wholesale.
    pub async fn apply_external(&self, new_value: Option<&str>) {
        let _guard = self.write_lock.lock().await;
        self.hydrated.store(true, Ordering::Release);

        let records = new_value
            .map(|raw| parse_scan_log(raw, self.capacity))
            .unwrap_or_default();
        log_debug!("scan log replaced by external write ({} record(s))", records.len());
        self.log.send_replace(Arc::new(records));
    }

    /// Follows other writers of the slot until `cancel` fires.
    pub fn start_sync(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut events = self.storage.subscribe();
        let store = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) if event.key == STORAGE_KEY => {
                            store.apply_external(event.new_value.as_deref()).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            log_warn!("scan log sync lagged by {skipped} event(s); re-reading");
                            store.reload().await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
            log_debug!("scan log sync stopped");
        })
    }

    async fn reload(&self) {
        let _guard = self.write_lock.lock().await;
        self.hydrated.store(true, Ordering::Release);
        let records = self.read_persisted().await;
        self.log.send_replace(Arc::new(records));
    }

    async fn persist(&self, records: &[ScanRecord]) {
        let serialized = match serde_json::to_string(records) {
            Ok(serialized) => serialized,
            Err(err) => {
                log_warn!("failed to serialize scan log: {err}");
                return;
            }
        };
        if let Err(err) = self.storage.write(STORAGE_KEY, &serialized).await {
            log_warn!("failed to persist scan log: {err:#}");
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDetection {
    #[serde(default, deserialize_with = "lenient_text")]
    label: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    confidence: Option<f64>,
}

/// A persisted record as it may actually be found on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredScanRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    timestamp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    source: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    waste_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    waste_type_confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    bin_suggestion: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    bin_confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    detections: Option<Vec<StoredDetection>>,
}

impl From<StoredScanRecord> for ScanRecord {
    fn from(stored: StoredScanRecord) -> Self {
        let timestamp = stored
            .timestamp
            .filter(|t| t.is_finite())
            .map(|t| t as i64)
            .unwrap_or(0);

        ScanCandidate {
            id: Some(
                stored
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ),
            timestamp: Some(timestamp),
            source: match stored.source.as_deref() {
                Some("camera") => ScanSource::Camera,
                _ => ScanSource::Upload,
            },
            waste_type: stored
                .waste_type
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            waste_type_confidence: clamp01(stored.waste_type_confidence.unwrap_or(0.0)),
            bin_suggestion: stored
                .bin_suggestion
                .as_deref()
                .and_then(WasteBin::parse)
                .unwrap_or_default(),
            bin_confidence: clamp01(stored.bin_confidence.unwrap_or(0.0)),
            image_url: stored.image_url.unwrap_or_default(),
            detections: stored.detections.map(|list| {
                list.into_iter()
                    .filter_map(|d| {
                        d.label
                            .map(|label| ScanDetection::new(label, d.confidence.unwrap_or(0.0)))
                    })
                    .collect()
            }),
        }
        .into_record()
    }
}

/// Parses a persisted log without ever failing: anything that is not a JSON
/// array is an empty log, non-object entries are dropped, and every field
/// of the remaining entries is coerced on its own.
pub fn parse_scan_log(raw: &str, capacity: usize) -> Vec<ScanRecord> {
    let entries = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(entries)) => entries,
        Ok(_) => return Vec::new(),
        Err(err) => {
            log_debug!("persisted scan log is not JSON: {err}");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|entry| serde_json::from_value::<StoredScanRecord>(entry).ok())
        .take(capacity)
        .map(ScanRecord::from)
        .collect()
}
