//! Response handling module - image responses, public image URLs, placeholder

pub mod base64;

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::Url;

use crate::backend::traits::Job;
use crate::error::{AppError, Result};

/// Generated images never change for a given URL
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Tiny JPEG served when no placeholder file is configured
const BUILTIN_PLACEHOLDER: &str = "/9j/4AAQSkZJRgABAQEASABIAAD/2wBDAP//////////////////////////////////////////////////////////////////////////////////////wgALCAABAAEBAREA/8QAFBABAAAAAAAAAAAAAAAAAAAAAP/aAAgBAQABPxA=";

/// JPEG response with long-lived caching headers
pub fn image_response(bytes: Bytes) -> Response {
    (
        [(CONTENT_TYPE, "image/jpeg"), (CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL)],
        bytes,
    )
        .into_response()
}

/// Placeholder response; must not be cached by clients or proxies
pub fn placeholder_response(bytes: Bytes) -> Response {
    ([(CONTENT_TYPE, "image/jpeg"), (CACHE_CONTROL, "no-store")], bytes).into_response()
}

/// Load the "queue full" image from `path`, or the built-in one
pub fn load_placeholder(path: Option<&str>) -> Result<Bytes> {
    match path {
        Some(path) => Ok(Bytes::from(std::fs::read(path)?)),
        None => Ok(Bytes::from(base64::decode(BUILTIN_PLACEHOLDER)?)),
    }
}

/// Public URL that reproduces a job's image
pub fn image_url(public_url: &str, job: &Job) -> Result<String> {
    let mut url = Url::parse(public_url)
        .map_err(|e| AppError::Internal(format!("Invalid public url '{}': {}", public_url, e)))?;

    url.path_segments_mut()
        .map_err(|_| AppError::Internal(format!("Public url '{}' cannot have a path", public_url)))?
        .pop_if_empty()
        .push("prompt")
        .push(&job.prompt);

    let params = &job.params;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("width", &params.width.to_string())
            .append_pair("height", &params.height.to_string())
            .append_pair("seed", &params.seed.to_string())
            .append_pair("model", &params.model);
        if params.enhance {
            query.append_pair("enhance", "true");
        }
        if params.nologo {
            query.append_pair("nologo", "true");
        }
        if let Some(negative) = &params.negative_prompt {
            query.append_pair("negative_prompt", negative);
        }
    }

    Ok(url.to_string())
}
