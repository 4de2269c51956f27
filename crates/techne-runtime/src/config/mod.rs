//! Configuration module for the Techne runtime.
//!
//! Layered loading (figment) and validation of logging, plugin manifest and
//! settings persistence options.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, PluginsConfig,
    SettingsBackendKind, SettingsConfig, SpanEventConfig, TechneConfig,
};
pub use validation::validate_config;
