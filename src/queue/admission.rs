//! Admission controller - cache check, per-client fairness, global gate

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::backend::traits::{Generator, Job};
use crate::cache::ResultCache;
use crate::config::QueueConfig;
use crate::error::{AppError, Result};
use crate::feed::{FeedBroadcaster, FeedEvent, FeedStatus, TimingEntry};
use crate::queue::client_queue::ClientQueues;
use crate::response::{image_url, load_placeholder};

/// How a submitted job was answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admitted {
    /// Served from the cache without queueing
    Cached(Bytes),
    /// Produced by a generation, possibly one started by another request
    Generated(Bytes),
    /// The client's backlog was full; this is the placeholder image
    QueueFull(Bytes),
}

impl Admitted {
    pub fn bytes(&self) -> &Bytes {
        match self {
            Admitted::Cached(b) | Admitted::Generated(b) | Admitted::QueueFull(b) => b,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Admitted::Cached(b) | Admitted::Generated(b) | Admitted::QueueFull(b) => b,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Admitted::QueueFull(_))
    }
}

/// Admission statistics
#[derive(Debug, Clone)]
pub struct AdmissionStats {
    pub in_flight: usize,
    pub clients: usize,
    pub global_available: usize,
    pub queue_full: u64,
}

/// Decides when a job may reach the generator
pub struct AdmissionController {
    cache: ResultCache,
    feed: Arc<FeedBroadcaster>,
    generator: Arc<dyn Generator>,
    clients: ClientQueues,
    global: Arc<Semaphore>,
    config: QueueConfig,
    public_url: String,
    placeholder: Bytes,
    queue_full: AtomicU64,
}

impl AdmissionController {
    pub fn new(
        cache: ResultCache,
        feed: Arc<FeedBroadcaster>,
        generator: Arc<dyn Generator>,
        config: &QueueConfig,
        public_url: impl Into<String>,
    ) -> Result<Self> {
        let placeholder = load_placeholder(config.placeholder_path.as_deref())?;

        Ok(Self {
            cache,
            feed,
            generator,
            clients: ClientQueues::new(),
            global: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            config: config.clone(),
            public_url: public_url.into(),
            placeholder,
            queue_full: AtomicU64::new(0),
        })
    }

    /// Run a job through cache check, client queue and global gate
    pub async fn submit(&self, job: Job) -> Result<Admitted> {
        let mut trace = vec![TimingEntry::now("received")];

        if let Some(bytes) = self.cache.lookup(&job.fingerprint).await {
            debug!(job = %job.id, fingerprint = %job.fingerprint, "Cache hit");
            return Ok(Admitted::Cached(bytes));
        }

        let ticket = self.clients.enter(&job.client_key);

        let in_flight = self.clients.in_flight();
        let mut delay = Duration::ZERO;
        if ticket.existed() && in_flight > self.config.busy_threshold {
            let backlog = ticket.backlog();
            if backlog >= self.config.backlog_limit {
                self.queue_full.fetch_add(1, Ordering::Relaxed);
                warn!(client = %job.client_key, backlog, in_flight, "Client queue full, serving placeholder");
                return Ok(Admitted::QueueFull(self.placeholder.clone()));
            }
            delay = Duration::from_millis(self.config.backlog_delay_ms * backlog as u64);
        }

        publish(
            &self.feed,
            &job,
            FeedEvent::new(&job.client_key, &job.prompt, job.params.clone(), FeedStatus::Queueing)
                .with_timing(trace.clone()),
            false,
        );

        // The throttle delay is served while holding the turn, so a later job
        // of the same client can never overtake a throttled one
        let _turn = ticket.wait_turn().await;
        if !delay.is_zero() {
            debug!(client = %job.client_key, delay_ms = delay.as_millis() as u64, "Throttling busy client");
            tokio::time::sleep(delay).await;
        }
        trace.push(TimingEntry::now("client_admitted"));

        let producer = {
            let global = self.global.clone();
            let feed = self.feed.clone();
            let generator = self.generator.clone();
            let image_url = image_url(&self.public_url, &job)?;
            let job = job.clone();

            move || async move {
                let _permit = global
                    .acquire_owned()
                    .await
                    .map_err(|_| AppError::Internal("Global queue closed".to_string()))?;

                trace.push(TimingEntry::now("generation_started"));
                publish(
                    &feed,
                    &job,
                    FeedEvent::new(&job.client_key, &job.prompt, job.params.clone(), FeedStatus::Generating)
                        .with_timing(trace.clone()),
                    false,
                );

                let generated = generator.generate(&job).await?;

                trace.push(TimingEntry::now("generation_finished"));
                publish(
                    &feed,
                    &job,
                    FeedEvent::new(&job.client_key, &job.prompt, job.params.clone(), FeedStatus::EndGenerating)
                        .with_image_url(image_url)
                        .with_maturity(generated.maturity)
                        .with_timing(trace),
                    true,
                );

                info!(job = %job.id, client = %job.client_key, "Job finished");
                Ok(generated.bytes)
            }
        };

        let bytes = self.cache.get_or_create(&job.fingerprint, producer).await?;
        Ok(Admitted::Generated(bytes))
    }

    /// Image served to clients whose queue is full
    pub fn placeholder(&self) -> &Bytes {
        &self.placeholder
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            in_flight: self.clients.in_flight(),
            clients: self.clients.client_count(),
            global_available: self.global.available_permits(),
            queue_full: self.queue_full.load(Ordering::Relaxed),
        }
    }
}

fn publish(feed: &FeedBroadcaster, job: &Job, event: FeedEvent, save_as_last_state: bool) {
    if job.params.nofeed {
        return;
    }
    feed.publish(event, save_as_last_state);
}
