pub mod burst;
pub mod controller;

pub use burst::{run_burst, BurstConfig, BurstOutcome, FrameSource};
pub use controller::{ScanOutcome, WasteScanner};
