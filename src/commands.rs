use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::camera::{CameraManager, EncodedImage, FacingMode, ImageSequenceBackend};
use crate::db::Database;
use crate::inference::{
    AiFlowClient, FallbackClassifier, FeatureFlag, HttpFeatureFlag, HttpInferenceClient,
    InferenceService, ServiceHealth, StaticFlag,
};
use crate::insights::{
    bin_summaries, contamination_alerts, scan_stats, segregation_performance,
    AlertAcknowledgements, BinSummary, ContaminationAlert, ScanStats, SegregationPerformance,
    ACK_STORAGE_KEY,
};
use crate::models::{ScanRecord, ScanSource};
use crate::scanner::{ScanOutcome, WasteScanner};
use crate::settings::{ScannerSettings, SettingsStore, DATABASE_FILE, SETTINGS_FILE};
use crate::store::{ScanLogStore, SharedStorage, STORAGE_KEY};

/// Where state lives and which camera to use.
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub data_dir: PathBuf,
    /// Settings file; defaults to `<data_dir>/settings.json`.
    pub config: Option<PathBuf>,
    /// Directory replayed as the camera; defaults to `<data_dir>/camera`.
    pub frames_dir: Option<PathBuf>,
    pub facing: Option<FacingMode>,
}

pub struct AppState {
    pub settings: SettingsStore,
    pub db: Database,
    pub storage: SharedStorage,
    pub scan_log: Arc<ScanLogStore>,
    pub alerts: AlertAcknowledgements,
    pub camera: Arc<CameraManager>,
    pub inference: Arc<HttpInferenceClient>,
    pub scanner: WasteScanner,
    effective: ScannerSettings,
}

impl AppState {
    pub async fn open(options: &AppOptions) -> Result<Self> {
        std::fs::create_dir_all(&options.data_dir)
            .with_context(|| format!("Failed to create {}", options.data_dir.display()))?;

        let settings_path = options
            .config
            .clone()
            .unwrap_or_else(|| options.data_dir.join(SETTINGS_FILE));
        let settings = SettingsStore::new(settings_path)?;
        let effective = settings.effective();

        let db = Database::new(options.data_dir.join(DATABASE_FILE))?;
        let storage = SharedStorage::new(Arc::new(db.clone()));

        let scan_log = Arc::new(ScanLogStore::new(storage.attach(), effective.scan_log_capacity));
        scan_log.hydrate().await;

        let alerts = AlertAcknowledgements::new(storage.attach());

        let frames_dir = options
            .frames_dir
            .clone()
            .unwrap_or_else(|| options.data_dir.join("camera"));
        let camera = Arc::new(CameraManager::new(
            Arc::new(ImageSequenceBackend::new(frames_dir)),
            options.facing.unwrap_or(effective.default_facing),
            effective.camera_options(),
        ));

        let inference = Arc::new(
            HttpInferenceClient::new(&effective.inference_url, effective.request_timeout())?
                .with_health_timeout(effective.health_timeout())
                .with_capture_confidence(effective.capture_confidence),
        );
        let classifier = build_classifier(&effective, Arc::clone(&inference))?;

        let scanner = WasteScanner::new(
            camera.clone(),
            classifier,
            Arc::clone(&scan_log),
            effective.burst_config(),
        );

        Ok(Self {
            settings,
            db,
            storage,
            scan_log,
            alerts,
            camera,
            inference,
            scanner,
            effective,
        })
    }

    /// Follows writes from other processes until `cancel` fires.
    pub fn start_sync(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let sync = self.scan_log.start_sync(cancel.clone());

        let storage = self.storage.clone();
        let interval = self.effective.external_poll_interval();
        let watcher = tokio::spawn(async move {
            storage
                .watch_external(
                    vec![STORAGE_KEY.to_string(), ACK_STORAGE_KEY.to_string()],
                    interval,
                    cancel,
                )
                .await;
        });

        vec![sync, watcher]
    }
}

fn build_classifier(
    settings: &ScannerSettings,
    primary: Arc<HttpInferenceClient>,
) -> Result<Arc<dyn InferenceService>> {
    let Some((identify_url, bin_url)) = settings.ai_flow_endpoints() else {
        return Ok(primary);
    };

    let secondary = AiFlowClient::new(identify_url, bin_url, settings.request_timeout())?;
    let flag: Arc<dyn FeatureFlag> = match &settings.ai_enabled_url {
        Some(url) => Arc::new(HttpFeatureFlag::new(url, settings.health_timeout())?),
        None => Arc::new(StaticFlag(true)),
    };

    Ok(Arc::new(FallbackClassifier::new(primary, Arc::new(secondary), flag)))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub stats: ScanStats,
    pub bins: Vec<BinSummary>,
    pub performance: SegregationPerformance,
}

pub async fn scan_image(state: &AppState, path: &Path) -> Result<ScanOutcome, String> {
    let image = EncodedImage::from_path(path).map_err(|e| format!("{e:#}"))?;
    state
        .scanner
        .scan_image(image, ScanSource::Upload)
        .await
        .map_err(|e| e.to_string())
}

/// Runs one camera scan; the scanner opens and releases the camera. `Ok(None)`
/// means another scan was already running and the camera was left alone.
pub async fn capture_scan(state: &AppState, single: bool) -> Result<Option<ScanOutcome>, String> {
    let outcome = if single {
        state.scanner.capture_single().await
    } else {
        state.scanner.capture_burst().await
    };
    outcome.map_err(|e| e.to_string())
}

pub async fn get_scans(state: &AppState, limit: Option<usize>) -> Result<Vec<ScanRecord>, String> {
    let snapshot = state.scan_log.all();
    let take = limit.unwrap_or(snapshot.len());
    Ok(snapshot.iter().take(take).cloned().collect())
}

pub async fn clear_scans(state: &AppState) -> Result<(), String> {
    state.scan_log.clear().await;
    Ok(())
}

pub async fn get_dashboard(state: &AppState) -> Result<Dashboard, String> {
    let snapshot = state.scan_log.all();
    Ok(Dashboard {
        stats: scan_stats(&snapshot),
        bins: bin_summaries(&snapshot),
        performance: segregation_performance(&snapshot),
    })
}

pub async fn get_alerts(state: &AppState) -> Result<Vec<ContaminationAlert>, String> {
    let acknowledged = state.alerts.load().await;
    Ok(contamination_alerts(&state.scan_log.all(), &acknowledged))
}

/// Marks the alert for `scan_id` as seen. Returns `false` if it already was.
pub async fn acknowledge_alert(state: &AppState, scan_id: &str) -> Result<bool, String> {
    let alerts = get_alerts(state).await?;
    if !alerts.iter().any(|alert| alert.scan_id == scan_id) {
        return Err(format!("no contamination alert for scan '{scan_id}'"));
    }
    state
        .alerts
        .acknowledge(scan_id)
        .await
        .map_err(|e| format!("{e:#}"))
}

pub async fn service_health(state: &AppState) -> Result<ServiceHealth, String> {
    state.inference.health().await.map_err(|e| e.to_string())
}
