//! Queue module - admission control and per-client queues

pub mod admission;
pub mod client_queue;

pub use admission::{AdmissionController, AdmissionStats, Admitted};
pub use client_queue::{ClientQueues, ClientTicket};
