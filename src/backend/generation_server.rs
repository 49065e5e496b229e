//! HTTP client for self-hosted generation servers

use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::backend::traits::{BackendRequest, GeneratedImage, MaturityFlags};
use crate::error::{AppError, Result};
use crate::response::base64;

/// Client for the `/generate` endpoint of a generation server
pub struct GenerationServerClient {
    client: Client,
}

/// Request body understood by generation servers
#[derive(Debug, Serialize)]
struct ServerGenerateRequest<'a> {
    prompts: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    width: u32,
    height: u32,
    seed: i64,
    model: &'a str,
}

/// One generated image as returned by a server
#[derive(Debug, Deserialize)]
struct ServerImage {
    #[serde(alias = "b64_json", alias = "base64")]
    image: String,
    #[serde(default, alias = "is_mature")]
    has_nsfw_concept: bool,
    #[serde(default)]
    is_child: bool,
}

/// Servers answer with a list of images or a single one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerGenerateResponse {
    Many(Vec<ServerImage>),
    One(ServerImage),
}

impl GenerationServerClient {
    /// Create a client with a per-call timeout
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Render one image on the given server
    ///
    /// Any transport failure, non-2xx status or undecodable body is an error;
    /// retrying is up to the caller.
    pub async fn generate(&self, server_url: &str, request: &BackendRequest) -> Result<GeneratedImage> {
        let url = format!("{}/generate", server_url.trim_end_matches('/'));
        let body = ServerGenerateRequest {
            prompts: vec![request.prompt.as_str()],
            negative_prompt: request.negative_prompt.as_deref(),
            width: request.width,
            height: request.height,
            seed: request.seed,
            model: &request.model,
        };

        debug!(server = %server_url, width = request.width, height = request.height, "Sending generate request");

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::BackendError(format!(
                "{} returned {}: {}",
                server_url, status, text
            )));
        }

        let parsed = response
            .json::<ServerGenerateResponse>()
            .await
            .map_err(|e| AppError::BackendError(format!("Failed to parse response from {}: {}", server_url, e)))?;

        let image = match parsed {
            ServerGenerateResponse::Many(images) => images
                .into_iter()
                .next()
                .ok_or_else(|| AppError::BackendError(format!("{} returned no images", server_url)))?,
            ServerGenerateResponse::One(image) => image,
        };

        let bytes = base64::decode(&image.image)
            .map_err(|e| AppError::BackendError(format!("Bad image data from {}: {}", server_url, e)))?;

        Ok(GeneratedImage {
            bytes: Bytes::from(bytes),
            maturity: MaturityFlags {
                is_mature: image.has_nsfw_concept,
                is_child: image.is_child,
            },
        })
    }
}
