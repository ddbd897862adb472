//! Configuration module for Quarry.
//!
//! Handles settings files and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, CacheBackend, CacheSettings, DatabaseSettings, ExecutionSettings,
    SchemaSettings, Settings, SettingsError, SettingsResult, TenantSettings,
};
