//! In-memory camera used by unit tests across the crate.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};

use crate::error::{ScanError, ScanResult};

use super::device::{CameraBackend, VideoStream};
use super::state::FacingMode;

#[derive(Clone, Copy, Default)]
struct FakeConfig {
    deny: bool,
    fail_opens_after: Option<usize>,
    grab: bool,
    ready_after_polls: usize,
    never_ready: bool,
    open_delay: Duration,
}

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    releases: AtomicUsize,
    live: AtomicUsize,
    grabs: AtomicUsize,
    reads: AtomicUsize,
    facings: Mutex<Vec<FacingMode>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeCamera {
    config: FakeConfig,
    counters: Arc<Counters>,
}

impl FakeCamera {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn deny_permission(mut self) -> Self {
        self.config.deny = true;
        self
    }

    pub(crate) fn fail_opens_after(mut self, successes: usize) -> Self {
        self.config.fail_opens_after = Some(successes);
        self
    }

    pub(crate) fn with_grab(mut self) -> Self {
        self.config.grab = true;
        self
    }

    pub(crate) fn dimensions_after_polls(mut self, polls: usize) -> Self {
        self.config.ready_after_polls = polls;
        self
    }

    pub(crate) fn never_ready(mut self) -> Self {
        self.config.never_ready = true;
        self
    }

    pub(crate) fn open_delay(mut self, delay: Duration) -> Self {
        self.config.open_delay = delay;
        self
    }

    pub(crate) fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }

    pub(crate) fn live_streams(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub(crate) fn grabs(&self) -> usize {
        self.counters.grabs.load(Ordering::SeqCst)
    }

    pub(crate) fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn opened_facings(&self) -> Vec<FacingMode> {
        self.counters.facings.lock().unwrap().clone()
    }
}

#[async_trait]
impl CameraBackend for FakeCamera {
    async fn open(&self, facing: FacingMode) -> ScanResult<Box<dyn VideoStream>> {
        let attempt = self.counters.opens.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.facings.lock().unwrap().push(facing);

        if !self.config.open_delay.is_zero() {
            tokio::time::sleep(self.config.open_delay).await;
        }
        if self.config.deny {
            return Err(ScanError::PermissionDenied);
        }
        if matches!(self.config.fail_opens_after, Some(limit) if attempt > limit) {
            return Err(ScanError::DeviceUnavailable("device busy".into()));
        }

        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            config: self.config,
            counters: self.counters.clone(),
            polls: Cell::new(0),
            released: false,
        }))
    }
}

struct FakeStream {
    config: FakeConfig,
    counters: Arc<Counters>,
    polls: Cell<usize>,
    released: bool,
}

impl FakeStream {
    fn frame() -> RgbaImage {
        RgbaImage::from_pixel(16, 12, Rgba([90, 160, 40, 255]))
    }
}

impl VideoStream for FakeStream {
    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.released || self.config.never_ready {
            return None;
        }
        let polls = self.polls.get();
        self.polls.set(polls + 1);
        if polls < self.config.ready_after_polls {
            None
        } else {
            Some((16, 12))
        }
    }

    fn grab_frame(&mut self) -> Option<RgbaImage> {
        if self.released || !self.config.grab {
            return None;
        }
        self.counters.grabs.fetch_add(1, Ordering::SeqCst);
        Some(Self::frame())
    }

    fn read_frame(&mut self) -> Option<RgbaImage> {
        if self.released {
            return None;
        }
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        Some(Self::frame())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}
