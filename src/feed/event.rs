//! Feed event payloads

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::backend::traits::{GenerationParams, MaturityFlags};

/// Lifecycle stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Queueing,
    Generating,
    EndGenerating,
}

/// One timestamped step of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingEntry {
    pub step: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl TimingEntry {
    pub fn now(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// A message on the public feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    pub client_key: String,
    pub prompt: String,
    pub params: GenerationParams,
    pub status: FeedStatus,
    #[serde(rename = "imageURL", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maturity: Option<MaturityFlags>,
    #[serde(default)]
    pub timing_trace: Vec<TimingEntry>,
}

impl FeedEvent {
    pub fn new(
        client_key: impl Into<String>,
        prompt: impl Into<String>,
        params: GenerationParams,
        status: FeedStatus,
    ) -> Self {
        Self {
            client_key: client_key.into(),
            prompt: prompt.into(),
            params,
            status,
            image_url: None,
            maturity: None,
            timing_trace: Vec::new(),
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_maturity(mut self, maturity: MaturityFlags) -> Self {
        self.maturity = Some(maturity);
        self
    }

    pub fn with_timing(mut self, trace: Vec<TimingEntry>) -> Self {
        self.timing_trace = trace;
        self
    }
}
