pub mod scan;

pub use scan::{
    clamp01, ScanCandidate, ScanDetection, ScanRecord, ScanSource, WasteBin, MAX_DETECTIONS,
    UNKNOWN_LABEL,
};
