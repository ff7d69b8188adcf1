pub mod device;
pub mod frame;
pub mod manager;
pub mod sources;
pub mod state;

#[cfg(test)]
pub(crate) mod fake;

pub use device::{CameraBackend, VideoStream};
pub use frame::EncodedImage;
pub use manager::{CameraManager, CameraOptions};
pub use sources::ImageSequenceBackend;
pub use state::{CameraState, CameraStatus, FacingMode};
