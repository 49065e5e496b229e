//! Per-client fairness queues

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Jobs of one client: how many are pending and the slot they take turns on
struct ClientQueueState {
    pending: usize,
    slot: Arc<tokio::sync::Mutex<()>>,
}

type ClientMap = Arc<Mutex<HashMap<String, ClientQueueState>>>;

/// Queues keyed by client, created on first use and dropped once empty
#[derive(Default)]
pub struct ClientQueues {
    clients: ClientMap,
    in_flight: Arc<AtomicUsize>,
}

/// A job's place in its client's queue; leaving is automatic on drop
pub struct ClientTicket {
    clients: ClientMap,
    in_flight: Arc<AtomicUsize>,
    key: String,
    slot: Arc<tokio::sync::Mutex<()>>,
    existed: bool,
    backlog: usize,
}

impl ClientQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the queue of `key`, creating it if needed
    pub fn enter(&self, key: &str) -> ClientTicket {
        let mut clients = self.clients.lock();
        let existed = clients.contains_key(key);
        let state = clients.entry(key.to_string()).or_insert_with(|| ClientQueueState {
            pending: 0,
            slot: Arc::new(tokio::sync::Mutex::new(())),
        });

        let backlog = state.pending;
        state.pending += 1;
        let slot = state.slot.clone();
        drop(clients);

        self.in_flight.fetch_add(1, Ordering::SeqCst);

        ClientTicket {
            clients: self.clients.clone(),
            in_flight: self.in_flight.clone(),
            key: key.to_string(),
            slot,
            existed,
            backlog,
        }
    }

    /// Jobs currently admitted across all clients
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Pending jobs of one client
    pub fn backlog(&self, key: &str) -> usize {
        self.clients.lock().get(key).map(|s| s.pending).unwrap_or(0)
    }

    /// Clients with at least one pending job
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

impl ClientTicket {
    /// The client already had a queue when this job arrived
    pub fn existed(&self) -> bool {
        self.existed
    }

    /// Jobs of the same client that were ahead of this one on arrival
    pub fn backlog(&self) -> usize {
        self.backlog
    }

    /// Wait until every earlier job of this client has finished
    pub async fn wait_turn(&self) -> OwnedMutexGuard<()> {
        self.slot.clone().lock_owned().await
    }
}

impl Drop for ClientTicket {
    fn drop(&mut self) {
        let mut clients = self.clients.lock();
        if let Some(state) = clients.get_mut(&self.key) {
            state.pending = state.pending.saturating_sub(1);
            if state.pending == 0 {
                clients.remove(&self.key);
                debug!(client = %self.key, "Client queue drained");
            }
        }
        drop(clients);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
