//! Third-party provider for the alternate model family

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::backend::models::snap_aspect_ratio;
use crate::backend::traits::{BackendRequest, GeneratedImage, ImageBackend, MaturityFlags};
use crate::error::{AppError, Result};
use crate::response::base64;

/// Provider that renders at a fixed set of aspect ratios
pub struct AlternateProvider {
    name: String,
    client: Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProviderRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    aspect_ratio: &'static str,
    seed: i64,
    model: &'a str,
    output_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(alias = "b64_json")]
    image: String,
    #[serde(default)]
    nsfw: bool,
}

impl AlternateProvider {
    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: "alternate".to_string(),
            client,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl ImageBackend for AlternateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &BackendRequest) -> Result<GeneratedImage> {
        let aspect_ratio = snap_aspect_ratio(request.width, request.height);
        let body = ProviderRequest {
            prompt: &request.prompt,
            negative_prompt: request.negative_prompt.as_deref(),
            aspect_ratio,
            seed: request.seed,
            model: &request.model,
            output_format: "jpeg",
        };

        debug!(backend = %self.name, aspect_ratio, model = %request.model, "Sending provider request");

        let mut call = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::BackendError(format!(
                "Provider returned {}: {}",
                status, text
            )));
        }

        let parsed = response
            .json::<ProviderResponse>()
            .await
            .map_err(|e| AppError::BackendError(format!("Failed to parse provider response: {}", e)))?;
        let bytes = base64::decode(&parsed.image)
            .map_err(|e| AppError::BackendError(format!("Bad image data from provider: {}", e)))?;

        Ok(GeneratedImage {
            bytes: Bytes::from(bytes),
            maturity: MaturityFlags {
                is_mature: parsed.nsfw,
                is_child: false,
            },
        })
    }
}
