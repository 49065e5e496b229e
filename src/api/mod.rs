//! API module - HTTP surface

pub mod client;
pub mod handlers;
pub mod routes;
