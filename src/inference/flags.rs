use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use crate::utils::coerce::lenient_flag;

/// Read-only switch deciding whether the secondary AI flow may be used.
#[async_trait]
pub trait FeatureFlag: Send + Sync {
    async fn is_enabled(&self) -> bool;
}

pub struct StaticFlag(pub bool);

#[async_trait]
impl FeatureFlag for StaticFlag {
    async fn is_enabled(&self) -> bool {
        self.0
    }
}

#[derive(Debug, Default, Deserialize)]
struct FlagBody {
    #[serde(default, deserialize_with = "lenient_flag")]
    enabled: Option<bool>,
}

/// `GET <url>` answering `{"enabled": bool}`. Any failure reads as disabled.
pub struct HttpFeatureFlag {
    client: reqwest::Client,
    url: String,
}

impl HttpFeatureFlag {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build feature flag HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FeatureFlag for HttpFeatureFlag {
    async fn is_enabled(&self) -> bool {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("feature flag endpoint returned {}", response.status());
                return false;
            }
            Err(err) => {
                debug!("feature flag endpoint unreachable: {err}");
                return false;
            }
        };

        response
            .json::<FlagBody>()
            .await
            .ok()
            .and_then(|body| body.enabled)
            .unwrap_or(false)
    }
}
