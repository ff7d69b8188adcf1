//! Inference service wire format and the canonical result the rest of the
//! crate works with. Nothing outside this module sees the wire types.

use serde::{Deserialize, Serialize};

use crate::models::{clamp01, ScanDetection, WasteBin, MAX_DETECTIONS};
use crate::utils::coerce::{lenient, lenient_flag, lenient_list, lenient_number, lenient_text};

/// Label the service reports while a burst has not gathered any votes.
pub const PLACEHOLDER_VOTE_LABEL: &str = "Thinking...";

/// Ties a frame to a capture burst so the service tallies votes per burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstDescriptor {
    pub burst_id: String,
    pub window: u32,
    pub min_votes: u32,
}

/// Rolling vote tally reported by the service for one burst.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSummary {
    /// `None` while no vote has been cast yet.
    pub label: Option<String>,
    pub votes: u32,
    pub window: u32,
    pub frames_seen: u32,
    pub is_ready: bool,
    pub is_stable: bool,
}

impl VoteSummary {
    /// Share of the window that agreed on the label, in `[0, 1]`. A summary
    /// without a window is measured against `default_window`.
    pub fn vote_ratio(&self, default_window: u32) -> f64 {
        let window = if self.window == 0 { default_window } else { self.window };
        if window == 0 {
            return 0.0;
        }
        clamp01(f64::from(self.votes) / f64::from(window))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinVerdict {
    pub bin: WasteBin,
    pub confidence: f64,
}

/// Canonical classification of one image.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// `None` when the service answered but detected nothing.
    pub top_label: Option<String>,
    pub top_confidence: f64,
    /// Most confident first, at most five.
    pub detections: Vec<ScanDetection>,
    pub vote_summary: Option<VoteSummary>,
    /// Set only by services that pick a bin themselves.
    pub bin: Option<BinVerdict>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PredictRequest<'a> {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conf: Option<f64>,
    pub source: &'static str,
    pub vote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_window: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_min: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawDetection {
    #[serde(default, deserialize_with = "lenient_text")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawStableVote {
    #[serde(default, deserialize_with = "lenient_text")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub votes: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub window: Option<f64>,
    #[serde(default, alias = "framesSeen", deserialize_with = "lenient_number")]
    pub frames: Option<f64>,
    #[serde(default, alias = "isReady", deserialize_with = "lenient_flag")]
    pub ready: Option<bool>,
    #[serde(default, rename = "isStable", deserialize_with = "lenient_flag")]
    pub is_stable: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawPredictResponse {
    #[serde(default, deserialize_with = "lenient_list")]
    pub detections: Option<Vec<RawDetection>>,
    #[serde(default, deserialize_with = "lenient")]
    pub top: Option<RawDetection>,
    #[serde(default, deserialize_with = "lenient")]
    pub stable: Option<RawStableVote>,
}

impl From<RawPredictResponse> for Classification {
    fn from(raw: RawPredictResponse) -> Self {
        let mut detections: Vec<ScanDetection> = raw
            .detections
            .unwrap_or_default()
            .into_iter()
            .filter_map(detection_from_raw)
            .collect();
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections.truncate(MAX_DETECTIONS);

        // A reply without `top` but with detections still has a best guess.
        let top = raw
            .top
            .and_then(detection_from_raw)
            .or_else(|| detections.first().cloned());

        Classification {
            top_confidence: top.as_ref().map(|t| t.confidence).unwrap_or(0.0),
            top_label: top.map(|t| t.label),
            detections,
            vote_summary: raw.stable.map(VoteSummary::from),
            bin: None,
        }
    }
}

impl From<RawStableVote> for VoteSummary {
    fn from(raw: RawStableVote) -> Self {
        let label = raw
            .label
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty() && l != PLACEHOLDER_VOTE_LABEL);

        VoteSummary {
            label,
            votes: count_from(raw.votes),
            window: count_from(raw.window),
            frames_seen: count_from(raw.frames),
            is_ready: raw.ready.unwrap_or(false),
            is_stable: raw.is_stable.unwrap_or(false),
        }
    }
}

fn detection_from_raw(raw: RawDetection) -> Option<ScanDetection> {
    let label = raw.label?.trim().to_string();
    if label.is_empty() {
        return None;
    }
    Some(ScanDetection::new(label, raw.confidence.unwrap_or(0.0)))
}

fn count_from(value: Option<f64>) -> u32 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v.min(f64::from(u32::MAX)).round() as u32,
        _ => 0,
    }
}

/// Health report of the inference service; every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    #[serde(default, deserialize_with = "lenient_flag")]
    pub ok: Option<bool>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub model_path: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub default_conf: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub vote_window: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub vote_min: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn is_ok(&self) -> bool {
        self.ok.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(value: serde_json::Value) -> Classification {
        let raw: RawPredictResponse = serde_json::from_value(value).unwrap();
        Classification::from(raw)
    }

    #[test]
    fn full_reply_is_normalized() {
        let result = classify(json!({
            "model": "yolo_model.pt",
            "detections": [
                {"label": "can", "confidence": 0.4},
                {"label": "bottle", "confidence": 0.9, "box": {"x1": 0, "y1": 0, "x2": 1, "y2": 1}},
            ],
            "top": {"label": "bottle", "confidence": 0.9},
            "stable": {"label": "bottle", "votes": 3, "window": 5, "frames": 3, "ready": false, "isStable": false}
        }));

        assert_eq!(result.top_label.as_deref(), Some("bottle"));
        assert_eq!(result.top_confidence, 0.9);
        assert_eq!(result.detections[0].label, "bottle");
        assert_eq!(result.detections[1].label, "can");
        let summary = result.vote_summary.unwrap();
        assert_eq!(summary.label.as_deref(), Some("bottle"));
        assert_eq!((summary.votes, summary.window, summary.frames_seen), (3, 5, 3));
        assert!(!summary.is_ready);
        assert_eq!(summary.vote_ratio(0), 0.6);
    }

    #[test]
    fn empty_reply_means_no_detection() {
        let result = classify(json!({}));
        assert_eq!(result, Classification::default());
    }

    #[test]
    fn garbage_fields_are_defaulted() {
        let result = classify(json!({
            "detections": "none",
            "top": {"label": "", "confidence": "high"},
            "stable": {"label": "Thinking...", "votes": -2, "window": "5", "ready": "true"}
        }));

        assert!(result.top_label.is_none());
        assert_eq!(result.top_confidence, 0.0);
        assert!(result.detections.is_empty());
        let summary = result.vote_summary.unwrap();
        assert!(summary.label.is_none());
        assert_eq!(summary.votes, 0);
        assert_eq!(summary.window, 5);
        assert!(summary.is_ready);
        assert!(!summary.is_stable);
    }

    #[test]
    fn confidences_are_clamped_and_detections_capped() {
        let detections: Vec<_> = (0..9)
            .map(|i| json!({"label": format!("item{i}"), "confidence": i as f64 * 0.3}))
            .collect();
        let result = classify(json!({"detections": detections}));

        assert_eq!(result.detections.len(), MAX_DETECTIONS);
        assert!(result.detections.iter().all(|d| (0.0..=1.0).contains(&d.confidence)));
        // No `top`: falls back to the best detection.
        assert_eq!(result.top_confidence, 1.0);
        assert!(result.top_label.is_some());
    }

    #[test]
    fn camel_case_vote_field_aliases_are_accepted() {
        let result = classify(json!({
            "stable": {"label": "paper", "votes": 4, "window": 5, "framesSeen": 5, "isReady": true, "isStable": true}
        }));
        let summary = result.vote_summary.unwrap();
        assert_eq!(summary.frames_seen, 5);
        assert!(summary.is_ready && summary.is_stable);
    }

    #[test]
    fn request_omits_vote_fields_for_single_shots() {
        let request = PredictRequest {
            image: "data:image/jpeg;base64,AA==".into(),
            conf: None,
            source: "upload",
            vote: false,
            stream_id: None,
            vote_window: None,
            vote_min: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, json!({"image": "data:image/jpeg;base64,AA==", "source": "upload", "vote": false}));
    }
}
