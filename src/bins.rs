//! Free-text label to disposal bin.

use crate::models::WasteBin;

const RECYCLING_KEYWORDS: &[&str] = &[
    "paper", "cardboard", "plastic", "metal", "glass", "can", "bottle",
];
const COMPOST_KEYWORDS: &[&str] = &["food", "organic", "compost", "fruit", "vegetable"];

/// Suggests a bin for `label`. Case-insensitive substring match; recycling
/// keywords win over compost keywords, everything else is landfill.
pub fn suggest_bin(label: &str) -> WasteBin {
    let label = label.to_lowercase();
    if RECYCLING_KEYWORDS.iter().any(|kw| label.contains(kw)) {
        WasteBin::Recycling
    } else if COMPOST_KEYWORDS.iter().any(|kw| label.contains(kw)) {
        WasteBin::Compost
    } else {
        WasteBin::Landfill
    }
}
