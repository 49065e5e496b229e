//! Content fingerprints used as cache keys

use std::fmt;

use crate::backend::traits::GenerationParams;

/// Longest human-readable prefix used in a persisted file name
const MAX_STEM_LEN: usize = 100;
/// Digest characters appended to the prefix to keep file names unique
const SUFFIX_LEN: usize = 8;

/// Stable hash of a normalized prompt and its generation parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: String,
    stem: String,
    bypass: bool,
}

impl Fingerprint {
    pub fn new(prompt: &str, params: &GenerationParams) -> Self {
        let normalized = normalize_prompt(prompt);
        // Plain data struct, serialization cannot fail
        let canonical = serde_json::to_string(params).unwrap_or_default();

        let mut hasher = blake3::Hasher::new();
        hasher.update(normalized.as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize().to_hex().to_string();

        Self {
            digest,
            stem: sanitize_stem(&normalized),
            bypass: params.fresh,
        }
    }

    /// Full hex digest, the in-memory cache key
    pub fn key(&self) -> &str {
        &self.digest
    }

    /// Filesystem-safe name of the persisted artifact
    pub fn file_name(&self) -> String {
        format!("{}_{}.jpg", self.stem, &self.digest[..SUFFIX_LEN])
    }

    /// Set for "always fresh" requests, which never touch the cache
    pub fn bypasses_cache(&self) -> bool {
        self.bypass
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest[..SUFFIX_LEN * 2])
    }
}

/// Trim and collapse whitespace so trivially different prompts share a key
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep ASCII alphanumerics, collapse everything else into single underscores
fn sanitize_stem(prompt: &str) -> String {
    let mut stem = String::with_capacity(prompt.len().min(MAX_STEM_LEN));
    let mut pending_separator = false;

    for c in prompt.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !stem.is_empty() {
                stem.push('_');
            }
            pending_separator = false;
            stem.push(c);
        } else {
            pending_separator = true;
        }
        if stem.len() >= MAX_STEM_LEN {
            break;
        }
    }

    stem.truncate(MAX_STEM_LEN);
    if stem.is_empty() {
        stem.push_str("image");
    }
    stem
}
