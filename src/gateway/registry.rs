//! Registry of generation servers with heartbeat liveness and least-loaded selection

use dashmap::DashMap;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{AppError, Result};

/// A registered generation server
pub struct ServerEntry {
    url: String,
    last_heartbeat: parking_lot::Mutex<Instant>,
    in_flight: AtomicUsize,
    queued: AtomicUsize,
    slots: Arc<Semaphore>,
}

/// Read-only view of an active server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub url: String,
    #[serde(default)]
    pub load: usize,
}

/// Held while a job runs against a server; releases the slot on drop
pub struct ServerPermit {
    entry: Arc<ServerEntry>,
    _permit: OwnedSemaphorePermit,
}

impl ServerPermit {
    pub fn url(&self) -> &str {
        &self.entry.url
    }
}

impl Drop for ServerPermit {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Keeps `queued` honest if the waiting future is dropped
struct QueuedGuard<'a>(&'a AtomicUsize);

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ServerEntry {
    fn new(url: String, concurrency: usize) -> Self {
        Self {
            url,
            last_heartbeat: parking_lot::Mutex::new(Instant::now()),
            in_flight: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            slots: Arc::new(Semaphore::new(concurrency)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Jobs running plus jobs waiting for a slot
    pub fn load(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst) + self.queued.load(Ordering::SeqCst)
    }

    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    fn is_alive(&self, timeout: Duration) -> bool {
        self.heartbeat_age() <= timeout
    }

    /// Wait for one of this server's submission slots
    pub async fn acquire(self: &Arc<Self>) -> Result<ServerPermit> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let guard = QueuedGuard(&self.queued);

        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal(format!("Submission queue for {} closed", self.url)))?;

        // Count as in flight before leaving the queued state so load never dips
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        drop(guard);

        Ok(ServerPermit {
            entry: self.clone(),
            _permit: permit,
        })
    }
}

/// Registry of generation servers
pub struct ServerRegistry {
    servers: DashMap<String, Arc<ServerEntry>>,
    client: Client,
    timeout: Duration,
    per_server_concurrency: usize,
    discovery_url: Option<String>,
}

impl ServerRegistry {
    /// Create a new registry from configuration
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.discovery_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            servers: DashMap::new(),
            client,
            timeout: Duration::from_secs(config.server_timeout_secs),
            per_server_concurrency: config.per_server_concurrency.max(1),
            discovery_url: config.discovery_url.clone(),
        })
    }

    /// Register a server or refresh its heartbeat
    pub fn register(&self, url: &str) {
        let url = url.trim_end_matches('/').to_string();
        self.sweep();

        let concurrency = self.per_server_concurrency;
        let mut created = false;
        self.servers
            .entry(url.clone())
            .and_modify(|entry| entry.touch())
            .or_insert_with(|| {
                created = true;
                Arc::new(ServerEntry::new(url.clone(), concurrency))
            });

        if created {
            info!(server = %url, "Registered generation server");
        } else {
            debug!(server = %url, "Heartbeat received");
        }
    }

    /// Drop entries whose heartbeat expired
    fn sweep(&self) {
        let timeout = self.timeout;
        self.servers.retain(|url, entry| {
            let alive = entry.is_alive(timeout);
            if !alive {
                info!(server = %url, "Removed stale generation server");
            }
            alive
        });
    }

    fn active(&self) -> Vec<Arc<ServerEntry>> {
        self.servers
            .iter()
            .filter(|entry| entry.is_alive(self.timeout))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Pick the least-loaded live server, discovering servers if none are alive
    pub async fn select_server(&self) -> Result<Arc<ServerEntry>> {
        self.select_server_excluding(&[]).await
    }

    /// Like `select_server`, but avoids `excluded` urls while any other live
    /// server remains
    pub async fn select_server_excluding(&self, excluded: &[String]) -> Result<Arc<ServerEntry>> {
        let mut active = self.active();

        if active.is_empty() {
            self.discover().await;
            active = self.active();
        }

        let preferred: Vec<Arc<ServerEntry>> = active
            .iter()
            .filter(|entry| !excluded.iter().any(|url| url == &entry.url))
            .cloned()
            .collect();
        if !preferred.is_empty() {
            active = preferred;
        }

        let selected = least_loaded(&active).ok_or(AppError::NoServersAvailable)?;

        debug!(
            server = %selected.url,
            load = selected.load(),
            candidates = active.len(),
            "Selected generation server"
        );

        Ok(selected)
    }

    /// Snapshot of live servers and their load
    pub fn list_active(&self) -> Vec<ServerSnapshot> {
        let mut snapshot: Vec<ServerSnapshot> = self
            .active()
            .into_iter()
            .map(|entry| ServerSnapshot {
                url: entry.url.clone(),
                load: entry.load(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.url.cmp(&b.url));
        snapshot
    }

    /// One-shot fetch of the discovery endpoint; failures leave the registry as is
    async fn discover(&self) {
        let Some(url) = self.discovery_url.as_deref() else {
            return;
        };

        let servers = match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<Vec<ServerSnapshot>>().await {
                    Ok(servers) => servers,
                    Err(e) => {
                        warn!(discovery = %url, error = %e, "Invalid discovery response");
                        return;
                    }
                }
            }
            Ok(response) => {
                warn!(discovery = %url, status = %response.status(), "Discovery request failed");
                return;
            }
            Err(e) => {
                warn!(discovery = %url, error = %e, "Discovery request failed");
                return;
            }
        };

        info!(discovery = %url, count = servers.len(), "Discovered generation servers");
        for server in servers {
            self.register(&server.url);
        }
    }
}

/// Minimum load wins; ties are broken uniformly at random
fn least_loaded(servers: &[Arc<ServerEntry>]) -> Option<Arc<ServerEntry>> {
    let loads: Vec<usize> = servers.iter().map(|s| s.load()).collect();
    let min = *loads.iter().min()?;

    let candidates: Vec<&Arc<ServerEntry>> = servers
        .iter()
        .zip(&loads)
        .filter(|(_, load)| **load == min)
        .map(|(server, _)| server)
        .collect();

    candidates.choose(&mut rand::thread_rng()).map(|s| (*s).clone())
}
