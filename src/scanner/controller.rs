use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::bins::suggest_bin;
use crate::camera::EncodedImage;
use crate::error::{ScanError, ScanResult};
use crate::inference::{InferenceService, VoteSummary};
use crate::models::{ScanCandidate, ScanRecord, ScanSource, WasteBin, UNKNOWN_LABEL};
use crate::store::ScanLogStore;

use super::burst::{run_burst, BurstConfig, FrameSource};

/// A recorded scan plus anything the user should be told about it.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub record: ScanRecord,
    /// Non-fatal problem, e.g. the service answered but saw nothing.
    pub notice: Option<ScanError>,
    pub vote_summary: Option<VoteSummary>,
}

/// Ties a frame source, a classifier and the scan log together.
///
/// Only one camera scan runs at a time: triggering another while one is in
/// flight returns `Ok(None)` without touching the camera. The scan that owns
/// the guard acquires the frame source and is the only one to release it.
pub struct WasteScanner {
    frames: Arc<dyn FrameSource>,
    service: Arc<dyn InferenceService>,
    store: Arc<ScanLogStore>,
    burst: BurstConfig,
    scanning: AtomicBool,
}

struct ScanningGuard<'a>(&'a AtomicBool);

impl Drop for ScanningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Releases the frame source when the scan ends, however it ends.
struct FramesLease<'a>(&'a dyn FrameSource);

impl Drop for FramesLease<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl WasteScanner {
    pub fn new(
        frames: Arc<dyn FrameSource>,
        service: Arc<dyn InferenceService>,
        store: Arc<ScanLogStore>,
        burst: BurstConfig,
    ) -> Self {
        Self {
            frames,
            service,
            store,
            burst,
            scanning: AtomicBool::new(false),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    fn begin_scan(&self) -> Option<ScanningGuard<'_>> {
        self.scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ScanningGuard(&self.scanning))
    }

    async fn lease_frames(&self) -> ScanResult<FramesLease<'_>> {
        self.frames.acquire().await?;
        Ok(FramesLease(self.frames.as_ref()))
    }

    /// Vote burst from the camera. The committed confidence is the vote ratio.
    pub async fn capture_burst(&self) -> ScanResult<Option<ScanOutcome>> {
        let Some(_guard) = self.begin_scan() else {
            info!("capture requested while a scan is running; ignoring");
            return Ok(None);
        };
        let _lease = self.lease_frames().await?;

        let outcome = run_burst(self.frames.as_ref(), self.service.as_ref(), &self.burst).await?;
        let record = self
            .store
            .append(ScanCandidate {
                source: ScanSource::Camera,
                waste_type: outcome.label,
                waste_type_confidence: outcome.confidence,
                bin_suggestion: outcome.bin,
                bin_confidence: outcome.confidence,
                image_url: outcome.frame.data_url(),
                detections: Some(outcome.detections),
                ..Default::default()
            })
            .await;

        Ok(Some(ScanOutcome {
            record,
            notice: None,
            vote_summary: outcome.vote_summary,
        }))
    }

    /// One frame from the camera, classified without voting.
    pub async fn capture_single(&self) -> ScanResult<Option<ScanOutcome>> {
        let Some(_guard) = self.begin_scan() else {
            info!("capture requested while a scan is running; ignoring");
            return Ok(None);
        };
        let _lease = self.lease_frames().await?;

        let frame = self.frames.capture_frame().await?;
        self.scan_image(frame, ScanSource::Camera).await.map(Some)
    }

    /// Single classification call, no burst. A reachable service that sees
    /// nothing still produces an `unknown` landfill record, with the empty
    /// detection reported as a notice. An unreachable one records nothing.
    pub async fn scan_image(&self, image: EncodedImage, source: ScanSource) -> ScanResult<ScanOutcome> {
        let classification = self.service.classify(&image, None).await?;

        let mut notice = None;
        let (waste_type, confidence, bin, bin_confidence) = match classification.top_label {
            Some(label) => {
                let confidence = classification.top_confidence;
                let (bin, bin_confidence) = match classification.bin {
                    Some(verdict) => (verdict.bin, verdict.confidence),
                    None => (suggest_bin(&label), confidence),
                };
                (label, confidence, bin, bin_confidence)
            }
            None => {
                warn!("{}", ScanError::EmptyDetection);
                notice = Some(ScanError::EmptyDetection);
                (UNKNOWN_LABEL.to_string(), 0.0, WasteBin::Landfill, 0.0)
            }
        };

        let record = self
            .store
            .append(ScanCandidate {
                source,
                waste_type,
                waste_type_confidence: confidence,
                bin_suggestion: bin,
                bin_confidence,
                image_url: image.data_url(),
                detections: Some(classification.detections),
                ..Default::default()
            })
            .await;

        Ok(ScanOutcome {
            record,
            notice,
            vote_summary: classification.vote_summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{BinVerdict, Classification};
    use crate::models::ScanDetection;
    use crate::scanner::burst::testing::{frame, vote, ScriptedFrames, ScriptedService};
    use crate::store::{MemoryStorage, SharedStorage};
    use tokio::sync::Notify;
    use tokio::time::Duration;

    async fn store() -> Arc<ScanLogStore> {
        let store = ScanLogStore::new(SharedStorage::new(Arc::new(MemoryStorage::new())).attach(), 200);
        store.hydrate().await;
        Arc::new(store)
    }

    fn quick() -> BurstConfig {
        BurstConfig {
            inter_frame_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn burst_records_vote_ratio_as_both_confidences() {
        let store = store().await;
        let service = Arc::new(ScriptedService::new(vec![
            Ok(vote(Some("bottle"), 1, 5, false)),
            Ok(vote(Some("bottle"), 2, 5, false)),
            Ok(vote(Some("bottle"), 3, 5, true)),
        ]));
        let scanner = WasteScanner::new(Arc::new(ScriptedFrames::frames(5)), service.clone(), store.clone(), quick());

        let outcome = scanner.capture_burst().await.unwrap().unwrap();

        assert_eq!(service.calls(), 3);
        let record = &outcome.record;
        assert_eq!(record.source, ScanSource::Camera);
        assert_eq!(record.waste_type, "bottle");
        assert_eq!(record.waste_type_confidence, 0.6);
        assert_eq!(record.bin_confidence, 0.6);
        assert_eq!(record.bin_suggestion, WasteBin::Recycling);
        assert_eq!(record.image_url, frame(2).data_url());
        assert_eq!(store.all().first(), Some(record));
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn failed_burst_records_nothing() {
        let store = store().await;
        let scanner = WasteScanner::new(
            Arc::new(ScriptedFrames::new(vec![])),
            Arc::new(ScriptedService::new(vec![])),
            store.clone(),
            quick(),
        );

        assert_eq!(scanner.capture_burst().await.unwrap_err(), ScanError::CaptureFailed);
        assert!(store.all().is_empty());
        assert!(!scanner.is_scanning());
    }

    struct GatedFrames {
        gate: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl FrameSource for GatedFrames {
        async fn capture_frame(&self) -> ScanResult<EncodedImage> {
            self.gate.notified().await;
            Ok(frame(9))
        }
    }

    #[tokio::test]
    async fn second_trigger_during_a_burst_is_ignored() {
        let store = store().await;
        let gate = Arc::new(Notify::new());
        let config = BurstConfig { frames: 1, ..quick() };
        let scanner = Arc::new(WasteScanner::new(
            Arc::new(GatedFrames { gate: gate.clone() }),
            Arc::new(ScriptedService::new(vec![Ok(vote(Some("can"), 1, 1, true))])),
            store.clone(),
            config,
        ));

        let running = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.capture_burst().await })
        };
        while !scanner.is_scanning() {
            tokio::task::yield_now().await;
        }

        assert!(scanner.capture_burst().await.unwrap().is_none());
        assert!(scanner.capture_single().await.unwrap().is_none());

        gate.notify_one();
        assert!(running.await.unwrap().unwrap().is_some());
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn single_shot_uses_service_label_and_policy_bin() {
        let store = store().await;
        let service = Arc::new(ScriptedService::new(vec![Ok(Classification {
            top_label: Some("apple core".into()),
            top_confidence: 0.83,
            detections: vec![ScanDetection::new("apple core", 0.83)],
            ..Default::default()
        })]));
        let scanner = WasteScanner::new(Arc::new(ScriptedFrames::frames(0)), service.clone(), store.clone(), quick());

        let outcome = scanner
            .scan_image(frame(1), ScanSource::Upload)
            .await
            .unwrap();

        assert!(outcome.notice.is_none());
        assert_eq!(outcome.record.waste_type, "apple core");
        assert_eq!(outcome.record.bin_suggestion, WasteBin::Landfill);
        assert_eq!(outcome.record.bin_confidence, 0.83);
        assert_eq!(outcome.record.detections.as_ref().map(Vec::len), Some(1));
        assert!(service.seen.lock().unwrap()[0].1.is_none());
    }

    #[tokio::test]
    async fn single_shot_keeps_a_service_supplied_bin() {
        let store = store().await;
        let service = Arc::new(ScriptedService::new(vec![Ok(Classification {
            top_label: Some("apple core".into()),
            top_confidence: 0.83,
            bin: Some(BinVerdict {
                bin: WasteBin::Compost,
                confidence: 0.7,
            }),
            ..Default::default()
        })]));
        let scanner = WasteScanner::new(Arc::new(ScriptedFrames::frames(0)), service, store, quick());

        let outcome = scanner.scan_image(frame(1), ScanSource::Upload).await.unwrap();
        assert_eq!(outcome.record.bin_suggestion, WasteBin::Compost);
        assert_eq!(outcome.record.bin_confidence, 0.7);
        assert_eq!(outcome.record.waste_type_confidence, 0.83);
    }

    #[tokio::test]
    async fn empty_detection_is_recorded_as_unknown_with_a_notice() {
        let store = store().await;
        let scanner = WasteScanner::new(
            Arc::new(ScriptedFrames::frames(0)),
            Arc::new(ScriptedService::new(vec![Ok(Classification::default())])),
            store.clone(),
            quick(),
        );

        let outcome = scanner.scan_image(frame(1), ScanSource::Upload).await.unwrap();

        assert_eq!(outcome.notice, Some(ScanError::EmptyDetection));
        assert_eq!(outcome.record.waste_type, UNKNOWN_LABEL);
        assert_eq!(outcome.record.bin_suggestion, WasteBin::Landfill);
        assert_eq!(outcome.record.waste_type_confidence, 0.0);
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_service_records_nothing() {
        let store = store().await;
        let scanner = WasteScanner::new(
            Arc::new(ScriptedFrames::frames(0)),
            Arc::new(ScriptedService::new(vec![Err(ScanError::ServiceUnavailable(
                "connection refused".into(),
            ))])),
            store.clone(),
            quick(),
        );

        let err = scanner.scan_image(frame(1), ScanSource::Upload).await.unwrap_err();
        assert_eq!(err, ScanError::ServiceUnavailable("connection refused".into()));
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn single_capture_uses_the_camera_source() {
        let store = store().await;
        let scanner = WasteScanner::new(
            Arc::new(ScriptedFrames::frames(1)),
            Arc::new(ScriptedService::new(vec![Ok(Classification {
                top_label: Some("glass jar".into()),
                top_confidence: 0.5,
                ..Default::default()
            })])),
            store,
            quick(),
        );

        let outcome = scanner.capture_single().await.unwrap().unwrap();
        assert_eq!(outcome.record.source, ScanSource::Camera);
        assert_eq!(outcome.record.bin_suggestion, WasteBin::Recycling);

        // Camera has nothing more to give.
        assert_eq!(scanner.capture_single().await.unwrap_err(), ScanError::NotReady);
        assert!(!scanner.is_scanning());
    }
}
