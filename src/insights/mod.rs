pub mod alerts;
pub mod summary;

pub use alerts::{
    contamination_alerts, AlertAcknowledgements, AlertSeverity, AlertStatus, ContaminationAlert,
    ACK_STORAGE_KEY,
};
pub use summary::{
    bin_summaries, scan_stats, segregation_performance, BinSummary, CompositionEntry, ScanStats,
    SegregationPerformance, REVIEW_THRESHOLD,
};
