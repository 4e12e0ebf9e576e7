//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, RealmConfig, RoomsConfig)
//! - [`defaults`]: Default value functions used by serde
//! - [`validation`]: Startup validation returning every error found

mod defaults;
mod types;
mod validation;

pub use types::{
    CacheConfig, Config, ConfigError, DatabaseConfig, LogFormat, RateLimitConfig, RealmConfig,
    ReconcileConfig, RoomsConfig, ServerConfig,
};
pub use validation::{ValidationError, validate};
