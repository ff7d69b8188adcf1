//! HTTP client for the object-detection service.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde_json::Value;

use crate::camera::EncodedImage;
use crate::error::{ScanError, ScanResult};
use crate::models::ScanSource;

use super::service::InferenceService;
use super::types::{BurstDescriptor, Classification, PredictRequest, RawPredictResponse, ServiceHealth};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CAPTURE_CONFIDENCE: f64 = 0.45;

pub struct HttpInferenceClient {
    client: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
    capture_confidence: f64,
}

impl HttpInferenceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build inference HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            capture_confidence: DEFAULT_CAPTURE_CONFIDENCE,
        })
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Detection threshold sent along with burst frames.
    pub fn with_capture_confidence(mut self, confidence: f64) -> Self {
        self.capture_confidence = confidence;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> ScanResult<ServiceHealth> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|err| transport_failure(&err))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ScanError::ServiceUnavailable(failure_reason(
                "inference service",
                status,
                &body,
            )));
        }

        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}

#[async_trait]
impl InferenceService for HttpInferenceClient {
    async fn classify(
        &self,
        image: &EncodedImage,
        burst: Option<&BurstDescriptor>,
    ) -> ScanResult<Classification> {
        let source = if burst.is_some() {
            ScanSource::Camera
        } else {
            ScanSource::Upload
        };
        let request = PredictRequest {
            image: image.data_url(),
            conf: burst.map(|_| self.capture_confidence),
            source: source.as_str(),
            vote: burst.is_some(),
            stream_id: burst.map(|b| b.burst_id.as_str()),
            vote_window: burst.map(|b| b.window),
            vote_min: burst.map(|b| b.min_votes),
        };

        let url = format!("{}/predict", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|err| transport_failure(&err))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| transport_failure(&err))?;

        if !status.is_success() {
            return Err(ScanError::ServiceUnavailable(failure_reason(
                "inference service",
                status,
                &body,
            )));
        }

        // A 2xx with an unreadable body is still an answer, just an empty one.
        let raw: RawPredictResponse = serde_json::from_str(&body).unwrap_or_else(|err| {
            debug!("predict reply was not JSON ({err}); treating as no detection");
            RawPredictResponse::default()
        });
        Ok(Classification::from(raw))
    }
}

pub(crate) fn transport_failure(err: &reqwest::Error) -> ScanError {
    let reason = if err.is_timeout() {
        "inference request timed out".to_string()
    } else if err.is_connect() {
        format!("could not reach inference service: {err}")
    } else {
        format!("inference request failed: {err}")
    };
    ScanError::ServiceUnavailable(reason)
}

/// Prefers the service's own `error` or `detail` message over the bare status.
pub(crate) fn failure_reason(service: &str, status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "detail"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| format!("{service} returned {status}"))
}
