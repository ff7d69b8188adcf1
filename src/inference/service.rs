use async_trait::async_trait;

use crate::camera::EncodedImage;
use crate::error::ScanResult;

use super::types::{BurstDescriptor, Classification};

/// Anything that can classify a still image.
///
/// `burst` is supplied only for frames of a vote burst; single-shot scans
/// (uploads and one-shot captures) pass `None`. Transport failures come back
/// as [`crate::error::ScanError::ServiceUnavailable`] with the reason intact.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn classify(
        &self,
        image: &EncodedImage,
        burst: Option<&BurstDescriptor>,
    ) -> ScanResult<Classification>;
}
