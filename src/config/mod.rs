//! Configuration module

mod settings;

pub use settings::{
    CacheConfig, DispatchConfig, FeedConfig, LoggingConfig, QueueConfig, RegistryConfig,
    ServerConfig, Settings,
};
