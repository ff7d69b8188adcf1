use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of raw candidate labels kept on a record.
pub const MAX_DETECTIONS: usize = 5;

/// Label used when nothing could be committed.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WasteBin {
    Recycling,
    Compost,
    Landfill,
}

impl WasteBin {
    pub const ALL: [WasteBin; 3] = [WasteBin::Recycling, WasteBin::Compost, WasteBin::Landfill];

    pub fn as_str(&self) -> &'static str {
        match self {
            WasteBin::Recycling => "recycling",
            WasteBin::Compost => "compost",
            WasteBin::Landfill => "landfill",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WasteBin::Recycling => "Recycling",
            WasteBin::Compost => "Compost",
            WasteBin::Landfill => "Landfill",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recycling" => Some(WasteBin::Recycling),
            "compost" => Some(WasteBin::Compost),
            "landfill" => Some(WasteBin::Landfill),
            _ => None,
        }
    }
}

impl Default for WasteBin {
    fn default() -> Self {
        WasteBin::Landfill
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    Upload,
    Camera,
}

impl ScanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanSource::Upload => "upload",
            ScanSource::Camera => "camera",
        }
    }
}

impl Default for ScanSource {
    fn default() -> Self {
        ScanSource::Upload
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanDetection {
    pub label: String,
    pub confidence: f64,
}

impl ScanDetection {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence: clamp01(confidence),
        }
    }
}

/// One completed classification event. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub source: ScanSource,
    pub waste_type: String,
    pub waste_type_confidence: f64,
    pub bin_suggestion: WasteBin,
    pub bin_confidence: f64,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<ScanDetection>>,
}

/// A record before the store has stamped it; `id` and `timestamp` are
/// assigned on append when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanCandidate {
    pub id: Option<String>,
    pub timestamp: Option<i64>,
    pub source: ScanSource,
    pub waste_type: String,
    pub waste_type_confidence: f64,
    pub bin_suggestion: WasteBin,
    pub bin_confidence: f64,
    pub image_url: String,
    pub detections: Option<Vec<ScanDetection>>,
}

impl ScanCandidate {
    pub fn into_record(self) -> ScanRecord {
        ScanRecord {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            timestamp: self
                .timestamp
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
            source: self.source,
            waste_type: self.waste_type,
            waste_type_confidence: clamp01(self.waste_type_confidence),
            bin_suggestion: self.bin_suggestion,
            bin_confidence: clamp01(self.bin_confidence),
            image_url: self.image_url,
            detections: self.detections.map(|mut list| {
                list.truncate(MAX_DETECTIONS);
                for detection in &mut list {
                    detection.confidence = clamp01(detection.confidence);
                }
                list
            }),
        }
    }
}

impl From<ScanRecord> for ScanCandidate {
    fn from(record: ScanRecord) -> Self {
        Self {
            id: Some(record.id),
            timestamp: Some(record.timestamp),
            source: record.source,
            waste_type: record.waste_type,
            waste_type_confidence: record.waste_type_confidence,
            bin_suggestion: record.bin_suggestion,
            bin_confidence: record.bin_confidence,
            image_url: record.image_url,
            detections: record.detections,
        }
    }
}

/// Clamps to `[0, 1]`; NaN and infinities become 0.
pub fn clamp01(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
