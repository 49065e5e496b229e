//! HTTP handlers

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{Stream, StreamExt};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::api::client::client_key;
use crate::backend::models;
use crate::backend::traits::{GenerationParams, Job};
use crate::error::{AppError, Result};
use crate::gateway::ServerSnapshot;
use crate::queue::Admitted;
use crate::response::{image_response, placeholder_response};
use crate::AppState;

const MIN_SIDE: u32 = 64;
const MAX_SIDE: u32 = 2048;
/// Seed value asking for a fresh, uncached image
const FRESH_SEED: i64 = -1;

/// Query string of `/prompt/{text}`
#[derive(Debug, Default, Deserialize)]
pub struct PromptQuery {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<i64>,
    pub model: Option<String>,
    pub enhance: Option<bool>,
    pub nologo: Option<bool>,
    pub negative_prompt: Option<String>,
    pub nofeed: Option<bool>,
}

impl PromptQuery {
    /// Apply defaults and limits; `seed=-1` picks a small random seed and
    /// marks the job as fresh
    pub fn into_params(self) -> GenerationParams {
        let defaults = GenerationParams::default();
        let fresh = self.seed == Some(FRESH_SEED);
        let seed = if fresh {
            rand::thread_rng().gen_range(0..1000)
        } else {
            self.seed.unwrap_or(defaults.seed)
        };
        let model = self
            .model
            .map(|m| models::lookup(&m).name.to_string())
            .unwrap_or(defaults.model);

        GenerationParams {
            width: self.width.unwrap_or(defaults.width).clamp(MIN_SIDE, MAX_SIDE),
            height: self.height.unwrap_or(defaults.height).clamp(MIN_SIDE, MAX_SIDE),
            seed,
            model,
            enhance: self.enhance.unwrap_or(false),
            nologo: self.nologo.unwrap_or(false),
            negative_prompt: self.negative_prompt.filter(|p| !p.trim().is_empty()),
            fresh,
            nofeed: self.nofeed.unwrap_or(false),
        }
    }
}

/// `GET /prompt/{text}`
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Path(prompt): Path<String>,
    Query(query): Query<PromptQuery>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<Response> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(AppError::InvalidRequest("Prompt must not be empty".to_string()));
    }

    let client = client_key(&headers, peer.map(|ConnectInfo(addr)| addr));
    let job = Job::new(prompt, query.into_params(), client);

    info!(
        job = %job.id,
        client = %job.client_key,
        model = %job.params.model,
        fresh = job.params.fresh,
        "Image requested"
    );

    let response = match state.admission.submit(job).await? {
        Admitted::QueueFull(bytes) => placeholder_response(bytes),
        admitted => image_response(admitted.into_bytes()),
    };
    Ok(response)
}

/// `GET /feed` - server-sent events, recent history first
pub async fn feed(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let events = state
        .feed
        .subscribe()
        .into_stream()
        .map(|event| Event::default().json_data(&event));

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Body of `POST /register`
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub url: String,
}

/// `POST /register` - heartbeat from a generation server
pub async fn register_server(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<Vec<ServerSnapshot>>> {
    let url = reqwest::Url::parse(request.url.trim())
        .map_err(|e| AppError::InvalidRequest(format!("Invalid server url '{}': {}", request.url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::InvalidRequest(format!(
            "Server url '{}' must use http or https",
            request.url
        )));
    }

    state.registry.register(url.as_str());
    Ok(Json(state.registry.list_active()))
}

/// `GET /register` - live servers and their load
pub async fn list_servers(State(state): State<Arc<AppState>>) -> Json<Vec<ServerSnapshot>> {
    Json(state.registry.list_active())
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let admission = state.admission.stats();
    let cache = state.cache.stats();

    Json(json!({
        "status": "ok",
        "active_servers": state.registry.list_active().len(),
        "feed_subscribers": state.feed.subscriber_count(),
        "jobs_in_flight": admission.in_flight,
        "queued_clients": admission.clients,
        "cache_records": cache.records,
        "cache_builds": cache.builds,
        "models": models::names(),
    }))
}
