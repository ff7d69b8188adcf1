//! Dashboard figures derived from a scan log snapshot. Nothing here writes.

use serde::Serialize;

use crate::models::{clamp01, ScanRecord, WasteBin, UNKNOWN_LABEL};

/// Below this bin confidence a scan is worth a second look.
pub const REVIEW_THRESHOLD: f64 = 0.35;

const LEVEL_PER_SCAN: usize = 5;
const COMPOSITION_WINDOW: usize = 50;
const COMPOSITION_ENTRIES: usize = 4;
const REVIEW_ITEMS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub total: usize,
    pub recycling: usize,
    /// Percent of scans sent to recycling.
    pub recycling_rate: f64,
    /// Mean bin confidence, as a percent.
    pub average_confidence: f64,
}

pub fn scan_stats(scans: &[ScanRecord]) -> ScanStats {
    let total = scans.len();
    let recycling = scans
        .iter()
        .filter(|s| s.bin_suggestion == WasteBin::Recycling)
        .count();

    if total == 0 {
        return ScanStats {
            total,
            recycling,
            recycling_rate: 0.0,
            average_confidence: 0.0,
        };
    }

    let confidence_sum: f64 = scans.iter().map(|s| s.bin_confidence).sum();
    ScanStats {
        total,
        recycling,
        recycling_rate: recycling as f64 / total as f64 * 100.0,
        average_confidence: confidence_sum / total as f64 * 100.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionEntry {
    pub name: String,
    /// Rounded share of the recent scans in this bin.
    pub percentage: u32,
    /// Mean label confidence of those scans.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinSummary {
    pub bin: WasteBin,
    pub name: &'static str,
    pub scans: usize,
    /// Fill estimate in percent: five per scan, capped at 100.
    pub level: u32,
    pub composition: Vec<CompositionEntry>,
    /// Low-confidence items, newest first.
    pub review_items: Vec<String>,
}

pub fn bin_summaries(scans: &[ScanRecord]) -> Vec<BinSummary> {
    WasteBin::ALL
        .iter()
        .map(|&bin| {
            let in_bin: Vec<&ScanRecord> = scans.iter().filter(|s| s.bin_suggestion == bin).collect();
            BinSummary {
                bin,
                name: bin.display_name(),
                scans: in_bin.len(),
                level: (in_bin.len().saturating_mul(LEVEL_PER_SCAN)).min(100) as u32,
                composition: composition(&in_bin),
                review_items: in_bin
                    .iter()
                    .filter(|s| needs_review(s))
                    .take(REVIEW_ITEMS)
                    .map(|s| display_label(&s.waste_type))
                    .collect(),
            }
        })
        .collect()
}

fn composition(scans: &[&ScanRecord]) -> Vec<CompositionEntry> {
    // (name, count, confidence sum) in first-seen order so ties stay stable.
    let mut groups: Vec<(String, usize, f64)> = Vec::new();
    for scan in scans.iter().take(COMPOSITION_WINDOW) {
        let name = display_label(&scan.waste_type);
        match groups.iter_mut().find(|(existing, _, _)| *existing == name) {
            Some(group) => {
                group.1 += 1;
                group.2 += scan.waste_type_confidence;
            }
            None => groups.push((name, 1, scan.waste_type_confidence)),
        }
    }

    let total: usize = groups.iter().map(|(_, count, _)| count).sum();
    groups.sort_by(|a, b| b.1.cmp(&a.1));
    groups
        .into_iter()
        .take(COMPOSITION_ENTRIES)
        .map(|(name, count, confidence_sum)| CompositionEntry {
            name,
            percentage: (count as f64 / total as f64 * 100.0).round() as u32,
            confidence: confidence_sum / count as f64,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegregationPerformance {
    /// Sum of bin confidences.
    pub correct: f64,
    /// Sum of the remaining doubt.
    pub incorrect: f64,
    /// `correct` as a percent of both.
    pub accuracy: f64,
}

pub fn segregation_performance(scans: &[ScanRecord]) -> SegregationPerformance {
    let correct: f64 = scans.iter().map(|s| clamp01(s.bin_confidence)).sum();
    let incorrect: f64 = scans.iter().map(|s| 1.0 - clamp01(s.bin_confidence)).sum();
    let total = correct + incorrect;

    SegregationPerformance {
        correct,
        incorrect,
        accuracy: if total > 0.0 {
            correct / total * 100.0
        } else {
            0.0
        },
    }
}

pub fn needs_review(scan: &ScanRecord) -> bool {
    scan.bin_confidence < REVIEW_THRESHOLD
}

/// `"plastic_bottle"` -> `"Plastic Bottle"`; empty labels read as unknown.
pub fn display_label(label: &str) -> String {
    let label = if label.trim().is_empty() {
        UNKNOWN_LABEL
    } else {
        label
    };

    label
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
