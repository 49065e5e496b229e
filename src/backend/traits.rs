//! Common traits and types for generation backends

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::Fingerprint;
use crate::error::Result;

/// Parameters that shape a generated image
///
/// The serialized form is the canonical parameter encoding hashed into the
/// fingerprint, so fields that do not change the output are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub model: String,
    pub enhance: bool,
    pub nologo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Caller asked for a random variant; never read from or written to the cache
    #[serde(skip)]
    pub fresh: bool,
    /// Keep this job out of the public feed
    #[serde(skip)]
    pub nofeed: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            seed: 42,
            model: "flux".to_string(),
            enhance: false,
            nologo: false,
            negative_prompt: None,
            fresh: false,
            nofeed: false,
        }
    }
}

/// A generation request travelling through admission and dispatch
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub prompt: String,
    pub params: GenerationParams,
    pub fingerprint: Fingerprint,
    /// Truncated client address, only used to group jobs for fairness
    pub client_key: String,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(prompt: impl Into<String>, params: GenerationParams, client_key: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let fingerprint = Fingerprint::new(&prompt, &params);

        Self {
            id: Uuid::new_v4(),
            prompt,
            params,
            fingerprint,
            client_key: client_key.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Content flags reported for a generated image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaturityFlags {
    pub is_mature: bool,
    pub is_child: bool,
}

/// A generated image and its content flags
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Bytes,
    pub maturity: MaturityFlags,
}

/// What a single backend call is asked to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub model: String,
}

/// A backend family that renders a request in one call
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Render one image
    async fn generate(&self, request: &BackendRequest) -> Result<GeneratedImage>;
}

/// Turns an admitted job into a finished image
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, job: &Job) -> Result<GeneratedImage>;
}
