use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbaImage;
use tokio::time::{Duration, Instant};

use crate::error::{ScanError, ScanResult};

use super::device::{CameraBackend, VideoStream};
use super::frame::EncodedImage;
use super::state::{CameraState, CameraStatus, FacingMode};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct CameraOptions {
    /// How long `capture_frame` waits for a frame with known dimensions.
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Scoped claim on the device. Dropping it is the only place a stream is
/// released, whichever path (stop, failed start, flip, teardown) let go of it.
struct ActiveStream {
    stream: Box<dyn VideoStream>,
    generation: u64,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.stream.release();
        log_debug!("camera stream generation {} released", self.generation);
    }
}

struct Slot {
    state: CameraState,
    stream: Option<ActiveStream>,
}

/// Owns the single camera claim of a scanner.
///
/// `start`/`flip` serialize on an async acquisition lock so two device claims
/// never overlap. `stop` is synchronous and never waits on that lock: it bumps
/// the stop epoch, which makes any in-flight start drop what it acquired.
pub struct CameraManager {
    backend: Arc<dyn CameraBackend>,
    options: CameraOptions,
    acquire: tokio::sync::Mutex<()>,
    slot: Mutex<Slot>,
    stop_epoch: AtomicU64,
}

impl CameraManager {
    pub fn new(backend: Arc<dyn CameraBackend>, facing: FacingMode, options: CameraOptions) -> Self {
        Self {
            backend,
            options,
            acquire: tokio::sync::Mutex::new(()),
            slot: Mutex::new(Slot {
                state: CameraState::new(facing),
                stream: None,
            }),
            stop_epoch: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CameraState {
        self.slot().state.clone()
    }

    pub fn status(&self) -> CameraStatus {
        self.slot().state.status
    }

    pub fn is_active(&self) -> bool {
        self.slot().stream.is_some()
    }

    /// Claims the device with the current facing mode. No-op when active.
    pub async fn start(&self) -> ScanResult<()> {
        let _acquire = self.acquire.lock().await;
        let already_active = self.slot().stream.is_some();
        if already_active {
            return Ok(());
        }
        self.open_locked().await
    }

    /// Releases the device. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let released = {
            let mut slot = self.slot();
            self.stop_epoch.fetch_add(1, Ordering::SeqCst);
            if slot.state.status == CameraStatus::Idle && slot.stream.is_none() {
                return;
            }
            slot.state.status = CameraStatus::Stopping;
            slot.stream.take()
        };

        drop(released);

        let mut slot = self.slot();
        if slot.state.status == CameraStatus::Stopping {
            slot.state.status = CameraStatus::Idle;
        }
        log_info!("camera stopped");
    }

    /// Stops the stream, toggles facing mode and restarts. A failed restart
    /// leaves the manager idle.
    pub async fn flip(&self) -> ScanResult<()> {
        let _acquire = self.acquire.lock().await;

        let previous = {
            let mut slot = self.slot();
            slot.state.status = CameraStatus::Stopping;
            slot.state.facing = slot.state.facing.toggled();
            slot.stream.take()
        };
        drop(previous);

        self.open_locked().await
    }

    /// Returns a JPEG still of the current frame.
    ///
    /// Prefers the stream's direct grab; otherwise polls until the stream
    /// reports dimensions, up to the ready timeout. A stop or restart while
    /// waiting or encoding fails the capture with `NotReady` instead of
    /// returning a frame from another stream.
    pub async fn capture_frame(&self) -> ScanResult<EncodedImage> {
        let (generation, grabbed) = {
            let mut slot = self.slot();
            let Some(active) = slot.stream.as_mut() else {
                return Err(ScanError::NotReady);
            };
            (active.generation, active.stream.grab_frame())
        };

        if let Some(frame) = grabbed {
            return self.encode_from(generation, frame).await;
        }

        let deadline = Instant::now() + self.options.ready_timeout;
        loop {
            let frame = {
                let mut slot = self.slot();
                match slot.stream.as_mut() {
                    Some(active) if active.generation == generation => {
                        if has_dimensions(active.stream.dimensions()) {
                            active.stream.read_frame()
                        } else {
                            None
                        }
                    }
                    _ => {
                        log_debug!("camera stream went away during capture");
                        return Err(ScanError::NotReady);
                    }
                }
            };

            if let Some(frame) = frame {
                return self.encode_from(generation, frame).await;
            }
            if Instant::now() >= deadline {
                log_warn!(
                    "camera produced no frame within {}ms",
                    self.options.ready_timeout.as_millis()
                );
                return Err(ScanError::NotReady);
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Encodes a frame read from stream `generation`, dropping it if that
    /// stream was stopped or replaced while the encoder ran.
    async fn encode_from(&self, generation: u64, frame: RgbaImage) -> ScanResult<EncodedImage> {
        let encoded = encode(frame).await?;
        let current = self
            .slot()
            .stream
            .as_ref()
            .is_some_and(|active| active.generation == generation);
        if !current {
            log_debug!("camera stream went away while encoding");
            return Err(ScanError::NotReady);
        }
        Ok(encoded)
    }

    /// Caller must hold the acquisition lock and the slot must be empty.
    async fn open_locked(&self) -> ScanResult<()> {
        let (facing, epoch) = {
            let mut slot = self.slot();
            slot.state.status = CameraStatus::Starting;
            (slot.state.facing, self.stop_epoch.load(Ordering::SeqCst))
        };

        let stream = match self.backend.open(facing).await {
            Ok(stream) => stream,
            Err(err) => {
                self.slot().state.status = CameraStatus::Idle;
                log_warn!("camera start ({facing}) failed: {err}");
                return Err(err);
            }
        };

        let mut slot = self.slot();
        let generation = slot.state.generation + 1;
        let active = ActiveStream { stream, generation };

        if self.stop_epoch.load(Ordering::SeqCst) != epoch {
            slot.state.status = CameraStatus::Idle;
            drop(slot);
            drop(active);
            return Err(ScanError::DeviceUnavailable(
                "camera was stopped while starting".into(),
            ));
        }

        slot.state.generation = generation;
        slot.state.status = CameraStatus::Active;
        slot.stream = Some(active);
        log_info!("camera started ({facing}), generation {generation}");
        Ok(())
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn has_dimensions(dimensions: Option<(u32, u32)>) -> bool {
    matches!(dimensions, Some((w, h)) if w > 0 && h > 0)
}

async fn encode(frame: RgbaImage) -> ScanResult<EncodedImage> {
    let encoded = tokio::task::spawn_blocking(move || EncodedImage::jpeg_from_frame(&frame))
        .await
        .map_err(|err| ScanError::DeviceUnavailable(format!("frame encoder failed: {err}")))?;

    encoded.map_err(|err| {
        log_warn!("discarding frame: {err:#}");
        ScanError::NotReady
    })
}
