use async_trait::async_trait;
use image::RgbaImage;

use crate::error::ScanResult;

use super::state::FacingMode;

/// Hands out exclusive claims on a video input device.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Claims the device facing `facing`. May suspend on a permission prompt.
    async fn open(&self, facing: FacingMode) -> ScanResult<Box<dyn VideoStream>>;
}

/// A live, claimed video stream.
pub trait VideoStream: Send {
    /// Frame size once the device has produced one, `None` before that.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Direct frame-grab primitive. Streams without one return `None` and the
    /// manager falls back to [`VideoStream::read_frame`].
    fn grab_frame(&mut self) -> Option<RgbaImage> {
        None
    }

    /// Copies the frame currently shown by the stream.
    fn read_frame(&mut self) -> Option<RgbaImage>;

    /// Gives the device back. Must be idempotent.
    fn release(&mut self);
}
