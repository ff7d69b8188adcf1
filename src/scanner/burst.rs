//! Capture bursts: several frames classified under one vote id, committed
//! once the service reports that enough of them agree.

use async_trait::async_trait;
use tokio::time::Duration;
use uuid::Uuid;

use crate::bins::suggest_bin;
use crate::camera::{CameraManager, EncodedImage};
use crate::error::{ScanError, ScanResult};
use crate::inference::{BurstDescriptor, InferenceService, VoteSummary};
use crate::models::{ScanDetection, WasteBin, UNKNOWN_LABEL};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const DEFAULT_BURST_FRAMES: u32 = 5;
pub const DEFAULT_MIN_VOTES: u32 = 3;
pub const DEFAULT_INTER_FRAME_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstConfig {
    /// Upper bound on captures, also sent as the vote window.
    pub frames: u32,
    pub min_votes: u32,
    pub inter_frame_delay: Duration,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            frames: DEFAULT_BURST_FRAMES,
            min_votes: DEFAULT_MIN_VOTES,
            inter_frame_delay: DEFAULT_INTER_FRAME_DELAY,
        }
    }
}

/// Where burst frames come from. The camera manager is the real one.
///
/// `acquire` and `release` bracket one scan; sources with nothing to open
/// keep the defaults.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn acquire(&self) -> ScanResult<()> {
        Ok(())
    }

    async fn capture_frame(&self) -> ScanResult<EncodedImage>;

    fn release(&self) {}
}

#[async_trait]
impl FrameSource for CameraManager {
    async fn acquire(&self) -> ScanResult<()> {
        self.start().await
    }

    async fn capture_frame(&self) -> ScanResult<EncodedImage> {
        CameraManager::capture_frame(self).await
    }

    fn release(&self) {
        self.stop();
    }
}

#[derive(Debug, Clone)]
pub struct BurstOutcome {
    pub burst_id: String,
    /// Last frame that was captured.
    pub frame: EncodedImage,
    pub label: String,
    /// Vote ratio; also used as the bin confidence.
    pub confidence: f64,
    pub bin: WasteBin,
    pub vote_summary: Option<VoteSummary>,
    pub detections: Vec<ScanDetection>,
    pub frames_captured: u32,
    pub classify_calls: u32,
}

/// Runs one burst.
///
/// Frames that are not ready and classify calls that fail are skipped; the
/// burst only fails when no frame was captured at all (`CaptureFailed`) or
/// when frames were captured but not one of them got an answer from the
/// service (`ServiceUnavailable`, last reason). Device errors abort.
pub async fn run_burst(
    frames: &dyn FrameSource,
    service: &dyn InferenceService,
    config: &BurstConfig,
) -> ScanResult<BurstOutcome> {
    let descriptor = BurstDescriptor {
        burst_id: Uuid::new_v4().to_string(),
        window: config.frames,
        min_votes: config.min_votes,
    };
    log_debug!("burst {} starting", descriptor.burst_id);

    let mut last_frame: Option<EncodedImage> = None;
    let mut last_summary: Option<VoteSummary> = None;
    let mut last_detections: Vec<ScanDetection> = Vec::new();
    let mut service_bin: Option<WasteBin> = None;
    let mut last_service_error: Option<ScanError> = None;
    let mut frames_captured = 0;
    let mut classify_calls = 0;
    let mut answered = 0;

    for index in 0..config.frames {
        match frames.capture_frame().await {
            Ok(frame) => {
                frames_captured += 1;
                classify_calls += 1;
                let result = service.classify(&frame, Some(&descriptor)).await;
                last_frame = Some(frame);

                match result {
                    Ok(classification) => {
                        answered += 1;
                        last_detections = classification.detections;
                        service_bin = classification.bin.map(|verdict| verdict.bin);
                        if let Some(summary) = classification.vote_summary {
                            let ready = summary.is_ready;
                            last_summary = Some(summary);
                            if ready {
                                log_debug!(
                                    "burst {} ready after {} frame(s)",
                                    descriptor.burst_id,
                                    index + 1
                                );
                                break;
                            }
                        }
                    }
                    Err(err) if err.is_per_frame() => {
                        log_warn!("burst {} frame {} not classified: {err}", descriptor.burst_id, index + 1);
                        last_service_error = Some(err);
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(err) if err.is_per_frame() => {
                log_warn!("burst {} frame {} skipped: {err}", descriptor.burst_id, index + 1);
            }
            Err(err) => return Err(err),
        }

        if index + 1 < config.frames {
            tokio::time::sleep(config.inter_frame_delay).await;
        }
    }

    let Some(frame) = last_frame else {
        return Err(ScanError::CaptureFailed);
    };
    if answered == 0 {
        return Err(last_service_error.unwrap_or(ScanError::CaptureFailed));
    }

    let label = committed_label(last_summary.as_ref());
    let confidence = last_summary
        .as_ref()
        .map(|summary| summary.vote_ratio(config.frames))
        .unwrap_or(0.0);
    let bin = service_bin.unwrap_or_else(|| suggest_bin(&label));

    log_info!(
        "burst {} committed '{}' ({:.2}) after {} call(s)",
        descriptor.burst_id,
        label,
        confidence,
        classify_calls
    );

    Ok(BurstOutcome {
        burst_id: descriptor.burst_id,
        frame,
        label,
        confidence,
        bin,
        vote_summary: last_summary,
        detections: last_detections,
        frames_captured,
        classify_calls,
    })
}

/// The vote label, unless there is none yet or it is the unknown sentinel.
fn committed_label(summary: Option<&VoteSummary>) -> String {
    summary
        .and_then(|s| s.label.as_deref())
        .filter(|label| !label.eq_ignore_ascii_case(UNKNOWN_LABEL))
        .unwrap_or(UNKNOWN_LABEL)
        .to_string()
}
