//! Provenance metadata embedded as a JPEG comment segment

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::traits::{BackendRequest, GenerationParams};
use crate::error::Result;
use crate::pipeline::MetadataWriter;

const SOI: [u8; 2] = [0xFF, 0xD8];
const COM: [u8; 2] = [0xFF, 0xFE];
/// Segment length field counts itself and is 16 bits wide
const MAX_COMMENT_LEN: usize = u16::MAX as usize - 2;

/// What was asked for and what was actually rendered
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub original: OriginalRequest,
    #[serde(rename = "final")]
    pub rendered: RenderedRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct OriginalRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub model: String,
}

impl Provenance {
    pub fn new(prompt: &str, params: &GenerationParams, rendered: &BackendRequest) -> Self {
        Self {
            original: OriginalRequest {
                prompt: prompt.to_string(),
                params: params.clone(),
            },
            rendered: RenderedRequest {
                prompt: rendered.prompt.clone(),
                width: rendered.width,
                height: rendered.height,
                seed: rendered.seed,
                model: rendered.model.clone(),
            },
        }
    }
}

/// Writes provenance JSON into a COM segment right after the SOI marker
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegCommentWriter;

impl MetadataWriter for JpegCommentWriter {
    fn embed(&self, image: Bytes, provenance: &Provenance) -> Result<Bytes> {
        if !image.starts_with(&SOI) {
            debug!("Not a JPEG, metadata not embedded");
            return Ok(image);
        }

        let comment = serde_json::to_vec(provenance)?;
        if comment.len() > MAX_COMMENT_LEN {
            warn!(size = comment.len(), "Provenance too large for a JPEG comment, skipped");
            return Ok(image);
        }

        let mut out = BytesMut::with_capacity(image.len() + comment.len() + 4);
        out.put_slice(&SOI);
        out.put_slice(&COM);
        out.put_u16((comment.len() + 2) as u16);
        out.put_slice(&comment);
        out.put_slice(&image[SOI.len()..]);

        Ok(out.freeze())
    }
}
