use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::models::{ScanRecord, WasteBin};
use crate::store::StorageHandle;

use super::summary::{display_label, needs_review};

pub const ACK_STORAGE_KEY: &str = "ecosort.alerts.ack.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    High,
    Medium,
    Low,
}

impl AlertSeverity {
    fn for_confidence(confidence: f64) -> Self {
        if confidence < 0.15 {
            AlertSeverity::High
        } else if confidence < 0.25 {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    New,
    Acknowledged,
}

/// A scan the bin suggestion is unsure about. The scan itself is untouched;
/// acknowledging only records its id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContaminationAlert {
    pub scan_id: String,
    pub timestamp: i64,
    pub bin: WasteBin,
    pub contaminant: String,
    pub bin_confidence: f64,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub image_url: String,
}

pub fn contamination_alerts(scans: &[ScanRecord], acknowledged: &BTreeSet<String>) -> Vec<ContaminationAlert> {
    scans
        .iter()
        .filter(|scan| needs_review(scan))
        .map(|scan| ContaminationAlert {
            scan_id: scan.id.clone(),
            timestamp: scan.timestamp,
            bin: scan.bin_suggestion,
            contaminant: display_label(&scan.waste_type),
            bin_confidence: scan.bin_confidence,
            severity: AlertSeverity::for_confidence(scan.bin_confidence),
            status: if acknowledged.contains(&scan.id) {
                AlertStatus::Acknowledged
            } else {
                AlertStatus::New
            },
            image_url: scan.image_url.clone(),
        })
        .collect()
}

/// Acknowledged alert ids, kept in their own slot next to the scan log.
pub struct AlertAcknowledgements {
    storage: StorageHandle,
}

impl AlertAcknowledgements {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage }
    }

    /// Unreadable state counts as nothing acknowledged.
    pub async fn load(&self) -> BTreeSet<String> {
        match self.storage.read(ACK_STORAGE_KEY).await {
            Ok(Some(raw)) => serde_json::from_str::<Vec<serde_json::Value>>(&raw)
                .map(|ids| {
                    ids.into_iter()
                        .filter_map(|id| id.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            Ok(None) => BTreeSet::new(),
            Err(err) => {
                log::warn!("failed to read alert acknowledgements: {err:#}");
                BTreeSet::new()
            }
        }
    }

    /// Returns `false` when the id was already acknowledged.
    pub async fn acknowledge(&self, scan_id: &str) -> Result<bool> {
        let mut ids = self.load().await;
        if !ids.insert(scan_id.to_string()) {
            return Ok(false);
        }
        let serialized = serde_json::to_string(&ids).context("failed to serialize acknowledgements")?;
        self.storage
            .write(ACK_STORAGE_KEY, &serialized)
            .await
            .context("failed to persist acknowledgement")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanCandidate;
    use crate::store::{MemoryStorage, SharedStorage};
    use std::sync::Arc;

    fn scan(id: &str, confidence: f64) -> ScanRecord {
        ScanCandidate {
            id: Some(id.into()),
            timestamp: Some(1),
            waste_type: "chip bag".into(),
            bin_confidence: confidence,
            ..Default::default()
        }
        .into_record()
    }

    #[test]
    fn only_low_confidence_scans_raise_alerts() {
        let scans = vec![scan("a", 0.1), scan("b", 0.2), scan("c", 0.3), scan("d", 0.35), scan("e", 0.9)];
        let acknowledged = BTreeSet::from(["b".to_string()]);

        let alerts = contamination_alerts(&scans, &acknowledged);

        let ids: Vec<_> = alerts.iter().map(|a| a.scan_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert_eq!(alerts[1].severity, AlertSeverity::Medium);
        assert_eq!(alerts[2].severity, AlertSeverity::Low);
        assert_eq!(alerts[0].status, AlertStatus::New);
        assert_eq!(alerts[1].status, AlertStatus::Acknowledged);
        assert_eq!(alerts[0].contaminant, "Chip Bag");
    }

    #[tokio::test]
    async fn acknowledgements_persist_without_touching_scans() {
        let shared = SharedStorage::new(Arc::new(MemoryStorage::new()));
        let acks = AlertAcknowledgements::new(shared.attach());
        let scans = vec![scan("a", 0.1)];

        assert!(acks.acknowledge("a").await.unwrap());
        assert!(!acks.acknowledge("a").await.unwrap());

        let reopened = AlertAcknowledgements::new(shared.attach());
        let alerts = contamination_alerts(&scans, &reopened.load().await);
        assert_eq!(alerts[0].status, AlertStatus::Acknowledged);
        assert_eq!(scans[0], scan("a", 0.1));
    }

    #[tokio::test]
    async fn corrupt_acknowledgements_read_as_none() {
        let shared = SharedStorage::new(Arc::new(MemoryStorage::new()));
        let handle = shared.attach();
        handle.write(ACK_STORAGE_KEY, "{oops").await.unwrap();

        assert!(AlertAcknowledgements::new(handle).load().await.is_empty());
    }
}
