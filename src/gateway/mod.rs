//! Gateway module - Generation server registry and selection

pub mod registry;

pub use registry::{ServerEntry, ServerPermit, ServerRegistry, ServerSnapshot};
