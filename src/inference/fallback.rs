use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use crate::camera::EncodedImage;
use crate::error::{ScanError, ScanResult};

use super::flags::FeatureFlag;
use super::service::InferenceService;
use super::types::{BurstDescriptor, Classification};

/// Primary service first; the secondary flow only when the primary is
/// unreachable, the flag is on, and the request is a single shot. Burst
/// frames never fall back since the secondary flow cannot tally votes.
pub struct FallbackClassifier {
    primary: Arc<dyn InferenceService>,
    secondary: Arc<dyn InferenceService>,
    flag: Arc<dyn FeatureFlag>,
}

impl FallbackClassifier {
    pub fn new(
        primary: Arc<dyn InferenceService>,
        secondary: Arc<dyn InferenceService>,
        flag: Arc<dyn FeatureFlag>,
    ) -> Self {
        Self {
            primary,
            secondary,
            flag,
        }
    }
}

#[async_trait]
impl InferenceService for FallbackClassifier {
    async fn classify(
        &self,
        image: &EncodedImage,
        burst: Option<&BurstDescriptor>,
    ) -> ScanResult<Classification> {
        let primary_err = match self.primary.classify(image, burst).await {
            Ok(result) => return Ok(result),
            Err(err @ ScanError::ServiceUnavailable(_)) if burst.is_none() => err,
            Err(err) => return Err(err),
        };

        if !self.flag.is_enabled().await {
            return Err(primary_err);
        }

        info!("primary classifier unavailable ({primary_err}); trying AI flow");
        self.secondary.classify(image, None).await.map_err(|err| {
            warn!("AI flow fallback failed: {err}");
            primary_err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::flags::StaticFlag;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        result: ScanResult<Classification>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(result: ScanResult<Classification>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceService for Scripted {
        async fn classify(
            &self,
            _image: &EncodedImage,
            _burst: Option<&BurstDescriptor>,
        ) -> ScanResult<Classification> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn labelled(label: &str) -> Classification {
        Classification {
            top_label: Some(label.into()),
            top_confidence: 0.7,
            ..Default::default()
        }
    }

    fn down() -> ScanResult<Classification> {
        Err(ScanError::ServiceUnavailable("connection refused".into()))
    }

    fn image() -> EncodedImage {
        EncodedImage::new("image/png", vec![1])
    }

    #[tokio::test]
    async fn primary_success_skips_secondary() {
        let primary = Scripted::new(Ok(labelled("can")));
        let secondary = Scripted::new(Ok(labelled("jar")));
        let classifier = FallbackClassifier::new(primary.clone(), secondary.clone(), Arc::new(StaticFlag(true)));

        let result = classifier.classify(&image(), None).await.unwrap();
        assert_eq!(result.top_label.as_deref(), Some("can"));
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn unavailable_primary_falls_back_when_enabled() {
        let primary = Scripted::new(down());
        let secondary = Scripted::new(Ok(labelled("jar")));
        let classifier = FallbackClassifier::new(primary, secondary.clone(), Arc::new(StaticFlag(true)));

        let result = classifier.classify(&image(), None).await.unwrap();
        assert_eq!(result.top_label.as_deref(), Some("jar"));
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn disabled_flag_surfaces_primary_error() {
        let primary = Scripted::new(down());
        let secondary = Scripted::new(Ok(labelled("jar")));
        let classifier = FallbackClassifier::new(primary, secondary.clone(), Arc::new(StaticFlag(false)));

        assert_eq!(classifier.classify(&image(), None).await, down());
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn burst_frames_never_fall_back() {
        let primary = Scripted::new(down());
        let secondary = Scripted::new(Ok(labelled("jar")));
        let classifier = FallbackClassifier::new(primary, secondary.clone(), Arc::new(StaticFlag(true)));
        let burst = BurstDescriptor {
            burst_id: "b".into(),
            window: 5,
            min_votes: 3,
        };

        assert_eq!(classifier.classify(&image(), Some(&burst)).await, down());
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn failed_fallback_reports_primary_reason() {
        let primary = Scripted::new(down());
        let secondary = Scripted::new(Err(ScanError::ServiceUnavailable("no key".into())));
        let classifier = FallbackClassifier::new(primary, secondary, Arc::new(StaticFlag(true)));

        assert_eq!(classifier.classify(&image(), None).await, down());
    }
}
