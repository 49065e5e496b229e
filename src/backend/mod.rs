//! Backend module - Model catalog, HTTP clients, and the dispatcher

pub mod alternate;
pub mod dispatcher;
pub mod generation_server;
pub mod models;
pub mod traits;

pub use dispatcher::Dispatcher;
pub use traits::{GeneratedImage, GenerationParams, Generator, Job, MaturityFlags};
