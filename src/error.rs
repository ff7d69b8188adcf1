use thiserror::Error;

/// Failures surfaced by the capture and classification pipeline.
///
/// Storage and configuration plumbing reports through `anyhow`; only the
/// conditions a caller is expected to react to live here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("camera access was denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera has not produced a usable frame yet")]
    NotReady,
    #[error("could not capture frames from camera")]
    CaptureFailed,
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("No object detected. Try moving closer or improving lighting.")]
    EmptyDetection,
}

impl ScanError {
    /// Errors a vote burst absorbs and keeps going after.
    pub fn is_per_frame(&self) -> bool {
        matches!(self, ScanError::NotReady | ScanError::ServiceUnavailable(_))
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
