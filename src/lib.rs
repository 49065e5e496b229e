//! Image Dispatch
//!
//! Admission, load-balancing, caching and live-feed layer in front of a pool
//! of image generation servers.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod pipeline;
pub mod queue;
pub mod response;

pub use error::{AppError, Result};

use std::sync::Arc;

use backend::{Dispatcher, Generator};
use cache::ResultCache;
use feed::FeedBroadcaster;
use gateway::ServerRegistry;
use queue::AdmissionController;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub registry: Arc<ServerRegistry>,
    pub cache: ResultCache,
    pub feed: Arc<FeedBroadcaster>,
    pub admission: Arc<AdmissionController>,
}

impl AppState {
    /// Wire every component from configuration
    pub fn new(settings: config::Settings) -> Result<Self> {
        let registry = Arc::new(ServerRegistry::new(&settings.registry)?);
        let dispatcher = Dispatcher::new(registry.clone(), &settings.dispatch)?;
        Self::with_generator(settings, registry, Arc::new(dispatcher))
    }

    /// Wire the components around a given generator
    pub fn with_generator(
        settings: config::Settings,
        registry: Arc<ServerRegistry>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let cache = ResultCache::new(&settings.cache);
        let feed = Arc::new(FeedBroadcaster::new(&settings.feed));
        let admission = Arc::new(AdmissionController::new(
            cache.clone(),
            feed.clone(),
            generator,
            &settings.queue,
            settings.server.public_url.clone(),
        )?);

        Ok(Self {
            settings: Arc::new(settings),
            registry,
            cache,
            feed,
            admission,
        })
    }
}
