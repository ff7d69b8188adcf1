use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::camera::{CameraOptions, FacingMode};
use crate::scanner::BurstConfig;

pub const SETTINGS_FILE: &str = "settings.json";
pub const DATABASE_FILE: &str = "ecosort.db";

const DATA_DIR_ENV: &str = "ECOSORT_DATA_DIR";
const INFERENCE_URL_ENV: &str = "ECOSORT_INFERENCE_URL";
const LEGACY_INFERENCE_URL_ENV: &str = "YOLO_SERVICE_URL";
const AI_FLOW_URL_ENV: &str = "ECOSORT_AI_FLOW_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerSettings {
    pub inference_url: String,
    pub request_timeout_ms: u64,
    pub health_timeout_ms: u64,
    /// Confidence threshold sent with camera frames.
    pub capture_confidence: f64,
    pub burst_frames: u32,
    pub burst_min_votes: u32,
    pub inter_frame_delay_ms: u64,
    pub frame_ready_timeout_ms: u64,
    pub frame_poll_interval_ms: u64,
    pub scan_log_capacity: usize,
    pub default_facing: FacingMode,
    pub external_poll_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_identify_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_bin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_enabled_url: Option<String>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            inference_url: "http://127.0.0.1:8000".into(),
            request_timeout_ms: 20_000,
            health_timeout_ms: 5_000,
            capture_confidence: 0.45,
            burst_frames: 5,
            burst_min_votes: 3,
            inter_frame_delay_ms: 250,
            frame_ready_timeout_ms: 5_000,
            frame_poll_interval_ms: 50,
            scan_log_capacity: 200,
            default_facing: FacingMode::Environment,
            external_poll_interval_ms: 500,
            ai_identify_url: None,
            ai_bin_url: None,
            ai_enabled_url: None,
        }
    }
}

impl ScannerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn external_poll_interval(&self) -> Duration {
        Duration::from_millis(self.external_poll_interval_ms.max(1))
    }

    pub fn burst_config(&self) -> BurstConfig {
        BurstConfig {
            frames: self.burst_frames.max(1),
            min_votes: self.burst_min_votes.max(1),
            inter_frame_delay: Duration::from_millis(self.inter_frame_delay_ms),
        }
    }

    pub fn camera_options(&self) -> CameraOptions {
        CameraOptions {
            ready_timeout: Duration::from_millis(self.frame_ready_timeout_ms),
            poll_interval: Duration::from_millis(self.frame_poll_interval_ms.max(1)),
        }
    }

    /// Both AI flow endpoints are needed before the secondary classifier is wired.
    pub fn ai_flow_endpoints(&self) -> Option<(&str, &str)> {
        match (&self.ai_identify_url, &self.ai_bin_url) {
            (Some(identify), Some(bin)) => Some((identify.as_str(), bin.as_str())),
            _ => None,
        }
    }

    /// Applies environment overrides; `lookup` is `std::env::var` outside tests.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = non_empty(INFERENCE_URL_ENV).or_else(|| non_empty(LEGACY_INFERENCE_URL_ENV)) {
            self.inference_url = url;
        }
        if let Some(base) = non_empty(AI_FLOW_URL_ENV) {
            let base = base.trim_end_matches('/');
            self.ai_identify_url = Some(format!("{base}/identifyWasteTypeFlow"));
            self.ai_bin_url = Some(format!("{base}/wasteBinClassificationFlow"));
            self.ai_enabled_url = Some(format!("{base}/enabled"));
        }
        self
    }
}

pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// `--data-dir`, then `ECOSORT_DATA_DIR`, then the platform data directory.
pub fn resolve_data_dir(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = env_lookup(DATA_DIR_ENV).filter(|value| !value.trim().is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("ecosort"))
        .context("Failed to resolve a data directory; pass --data-dir")
}

/// Settings file loaded once at startup.
pub struct SettingsStore {
    data: ScannerSettings,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("Ignoring unparseable settings at {}: {err}", path.display());
                ScannerSettings::default()
            })
        } else {
            ScannerSettings::default()
        };

        Ok(Self { data })
    }

    /// Settings as stored on disk, before environment overrides.
    pub fn settings(&self) -> ScannerSettings {
        self.data.clone()
    }

    pub fn effective(&self) -> ScannerSettings {
        self.settings().with_env_overrides(env_lookup)
    }
}
