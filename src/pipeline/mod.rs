//! Post-processing collaborators applied around a backend call
//!
//! Prompt enhancement, watermark compositing and resizing are provided by
//! external services; the dispatcher only depends on the traits below. The
//! defaults pass data through untouched, except metadata embedding which is
//! done in-process.

pub mod metadata;

pub use metadata::{JpegCommentWriter, Provenance};

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::backend::models::{BackendFamily, ModelInfo};
use crate::backend::traits::MaturityFlags;
use crate::error::Result;

/// Watermark variant stamped onto an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    Standard,
    /// Smaller mark for images from the alternate provider
    Discreet,
}

/// Pick the watermark for an image; mature images are always marked
pub fn watermark_for(model: &ModelInfo, maturity: MaturityFlags, nologo: bool) -> Option<Watermark> {
    if maturity.is_mature {
        return Some(Watermark::Standard);
    }
    if nologo {
        return None;
    }
    match model.family {
        BackendFamily::GenerationServer => Some(Watermark::Standard),
        BackendFamily::Alternate => Some(Watermark::Discreet),
    }
}

/// Rewrites prompts before generation
#[async_trait]
pub trait PromptEnhancer: Send + Sync {
    async fn enhance(&self, prompt: &str, seed: i64) -> Result<String>;
}

/// Stamps a watermark onto an image
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn composite(&self, image: Bytes, watermark: Watermark) -> Result<Bytes>;
}

/// Scales an image to the requested output size
#[async_trait]
pub trait Resizer: Send + Sync {
    async fn resize(&self, image: Bytes, width: u32, height: u32) -> Result<Bytes>;
}

/// Embeds provenance metadata into the image container
pub trait MetadataWriter: Send + Sync {
    fn embed(&self, image: Bytes, provenance: &Provenance) -> Result<Bytes>;
}

/// Leaves data unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

#[async_trait]
impl PromptEnhancer for Passthrough {
    async fn enhance(&self, prompt: &str, _seed: i64) -> Result<String> {
        Ok(prompt.to_string())
    }
}

#[async_trait]
impl Compositor for Passthrough {
    async fn composite(&self, image: Bytes, watermark: Watermark) -> Result<Bytes> {
        debug!(?watermark, "No compositor configured, image left unmarked");
        Ok(image)
    }
}

#[async_trait]
impl Resizer for Passthrough {
    async fn resize(&self, image: Bytes, width: u32, height: u32) -> Result<Bytes> {
        debug!(width, height, "No resizer configured, image left at native size");
        Ok(image)
    }
}

/// The collaborators used by the dispatcher
#[derive(Clone)]
pub struct Pipeline {
    pub enhancer: Arc<dyn PromptEnhancer>,
    pub compositor: Arc<dyn Compositor>,
    pub resizer: Arc<dyn Resizer>,
    pub metadata: Arc<dyn MetadataWriter>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            enhancer: Arc::new(Passthrough),
            compositor: Arc::new(Passthrough),
            resizer: Arc::new(Passthrough),
            metadata: Arc::new(JpegCommentWriter),
        }
    }
}

impl Pipeline {
    /// Watermark, resize, then embed provenance; the first failure aborts
    pub async fn post_process(
        &self,
        image: Bytes,
        watermark: Option<Watermark>,
        width: u32,
        height: u32,
        provenance: &Provenance,
    ) -> Result<Bytes> {
        let image = match watermark {
            Some(watermark) => self.compositor.composite(image, watermark).await?,
            None => image,
        };
        let image = self.resizer.resize(image, width, height).await?;
        self.metadata.embed(image, provenance)
    }
}
