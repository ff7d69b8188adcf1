//! Replay camera backed by still images on disk.
//!
//! Useful for running the scanner headless: point it at a directory of
//! photos (optionally split into `user/` and `environment/`) and every read
//! advances to the next picture, looping at the end.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::RgbaImage;
use log::warn;

use crate::error::{ScanError, ScanResult};

use super::device::{CameraBackend, VideoStream};
use super::state::FacingMode;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

pub struct ImageSequenceBackend {
    root: PathBuf,
}

impl ImageSequenceBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl CameraBackend for ImageSequenceBackend {
    async fn open(&self, facing: FacingMode) -> ScanResult<Box<dyn VideoStream>> {
        let root = self.root.clone();
        let stream = tokio::task::spawn_blocking(move || load_sequence(&root, facing))
            .await
            .map_err(|err| ScanError::DeviceUnavailable(format!("frame loader failed: {err}")))??;
        Ok(Box::new(stream))
    }
}

fn load_sequence(root: &Path, facing: FacingMode) -> ScanResult<ImageSequenceStream> {
    let facing_dir = root.join(facing.as_str());
    let dir = if facing_dir.is_dir() {
        facing_dir
    } else {
        root.to_path_buf()
    };

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            return Err(ScanError::PermissionDenied)
        }
        Err(err) => {
            return Err(ScanError::DeviceUnavailable(format!(
                "{}: {err}",
                dir.display()
            )))
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_frame_extension(path))
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        match image::open(&path) {
            Ok(img) => frames.push(img.to_rgba8()),
            Err(err) => warn!("skipping unreadable frame {}: {err}", path.display()),
        }
    }

    if frames.is_empty() {
        return Err(ScanError::DeviceUnavailable(format!(
            "no frames found in {}",
            dir.display()
        )));
    }

    Ok(ImageSequenceStream {
        frames,
        cursor: 0,
        released: false,
    })
}

fn has_frame_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

struct ImageSequenceStream {
    frames: Vec<RgbaImage>,
    cursor: usize,
    released: bool,
}

impl VideoStream for ImageSequenceStream {
    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.released {
            return None;
        }
        self.frames
            .get(self.cursor)
            .map(|frame| frame.dimensions())
    }

    fn read_frame(&mut self) -> Option<RgbaImage> {
        if self.released || self.frames.is_empty() {
            return None;
        }
        let frame = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Some(frame)
    }

    fn release(&mut self) {
        self.released = true;
        self.frames.clear();
        self.cursor = 0;
    }
}
