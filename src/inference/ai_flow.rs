//! Secondary classifier backed by two hosted AI flows: one names the waste,
//! the other picks the bin. Both take the photo as a data URI.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::camera::EncodedImage;
use crate::error::{ScanError, ScanResult};
use crate::models::{clamp01, ScanDetection, WasteBin};
use crate::utils::coerce::{lenient_number, lenient_text};

use super::client::{failure_reason, transport_failure};
use super::service::InferenceService;
use super::types::{BinVerdict, BurstDescriptor, Classification};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowInput<'a> {
    photo_data_uri: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WasteTypeOutput {
    #[serde(default, deserialize_with = "lenient_text")]
    waste_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinOutput {
    #[serde(default, deserialize_with = "lenient_text")]
    bin_suggestion: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    confidence: Option<f64>,
}

pub struct AiFlowClient {
    client: reqwest::Client,
    identify_url: String,
    bin_url: String,
}

impl AiFlowClient {
    pub fn new(
        identify_url: impl Into<String>,
        bin_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build AI flow HTTP client")?;

        Ok(Self {
            client,
            identify_url: identify_url.into(),
            bin_url: bin_url.into(),
        })
    }

    async fn run_flow<T>(&self, url: &str, photo: &str) -> ScanResult<T>
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        let response = self
            .client
            .post(url)
            .json(&FlowInput {
                photo_data_uri: photo,
            })
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
                "AI flow",
                status,
                &body,
            )));
        }

        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}

#[async_trait]
impl InferenceService for AiFlowClient {
    async fn classify(
        &self,
        image: &EncodedImage,
        _burst: Option<&BurstDescriptor>,
    ) -> ScanResult<Classification> {
        let photo = image.data_url();
        let (waste, bin) = tokio::try_join!(
            self.run_flow::<WasteTypeOutput>(&self.identify_url, &photo),
            self.run_flow::<BinOutput>(&self.bin_url, &photo),
        )?;

        let label = waste
            .waste_type
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty());
        let confidence = clamp01(waste.confidence.unwrap_or(0.0));
        let verdict = bin
            .bin_suggestion
            .as_deref()
            .and_then(WasteBin::parse)
            .map(|bin_choice| BinVerdict {
                bin: bin_choice,
                confidence: clamp01(bin.confidence.unwrap_or(0.0)),
            });

        Ok(Classification {
            detections: label
                .iter()
                .map(|l| ScanDetection::new(l.clone(), confidence))
                .collect(),
            top_confidence: if label.is_some() { confidence } else { 0.0 },
            top_label: label,
            vote_summary: None,
            bin: verdict,
        })
    }
}
