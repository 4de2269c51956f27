//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;
use techne_core::{RegistrationError, SettingsError};

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A plugin descriptor was rejected.
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// The settings backend could not be prepared.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
