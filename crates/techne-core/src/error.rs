//! Unified error types for the Techne plugin core.
//!
//! Only [`RegistrationError`] is ever returned to the caller of a
//! registration call.  Everything raised while orchestrating plugins is
//! recorded in plugin state and published on the event bus instead.

use thiserror::Error;

/// Error type returned by plugin hooks, bus listeners and loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Registration Errors
// =============================================================================

/// Contract violations detected when a descriptor is registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The descriptor carries an empty id.
    #[error("plugin id must be a non-empty string")]
    MissingId,

    /// The id contains whitespace or control characters.
    #[error("invalid plugin id '{id}': {reason}")]
    InvalidId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Result type for registration.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

// =============================================================================
// Lifecycle Errors
// =============================================================================

/// Failures raised while driving a plugin through its lifecycle.
///
/// Apart from [`LifecycleError::NotRegistered`], these never escape
/// `start`, `enable_plugin` or `disable_plugin`; they are stored as the
/// plugin's last error and emitted as `plugin:error`.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// No descriptor is registered under this id.
    #[error("plugin '{id}' is not registered")]
    NotRegistered {
        /// The unknown id.
        id: String,
    },

    /// The plugin's `init` returned an error or panicked.
    #[error("plugin '{id}' failed to initialize: {reason}")]
    InitFailed {
        /// The failing plugin.
        id: String,
        /// Rendered error.
        reason: String,
    },

    /// The plugin's `init` did not settle within the configured timeout.
    #[error("plugin '{id}' did not initialize within {millis}ms")]
    InitTimedOut {
        /// The slow plugin.
        id: String,
        /// Configured timeout.
        millis: u128,
    },

    /// A dependency is missing or failed while running in strict mode.
    #[error("plugin '{id}' requires '{dependency}', which is not available")]
    DependencyUnavailable {
        /// The dependent plugin.
        id: String,
        /// The unavailable dependency.
        dependency: String,
    },

    /// The plugin's `destroy` returned an error or panicked.
    #[error("plugin '{id}' failed during teardown: {reason}")]
    DestroyFailed {
        /// The failing plugin.
        id: String,
        /// Rendered error.
        reason: String,
    },
}

impl LifecycleError {
    /// Returns the plugin id this error concerns.
    pub fn plugin_id(&self) -> &str {
        match self {
            Self::NotRegistered { id }
            | Self::InitFailed { id, .. }
            | Self::InitTimedOut { id, .. }
            | Self::DependencyUnavailable { id, .. }
            | Self::DestroyFailed { id, .. } => id,
        }
    }

    /// Lifecycle phase the error belongs to, as reported in `plugin:error`.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::NotRegistered { .. } => "lookup",
            Self::InitFailed { .. } | Self::InitTimedOut { .. } => "init",
            Self::DependencyUnavailable { .. } => "dependency",
            Self::DestroyFailed { .. } => "destroy",
        }
    }
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

// =============================================================================
// Settings Errors
// =============================================================================

/// Errors raised by a settings backend.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The durable medium could not be read or written.
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The settings map could not be serialized.
    #[error("settings serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The backend rejected the write for its own reasons.
    #[error("settings backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type for settings backends.
pub type SettingsResult<T> = Result<T, SettingsError>;

// =============================================================================
// Loader Errors
// =============================================================================

/// Errors raised by a [`ResourceLoader`](crate::loader::ResourceLoader).
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The embedding application did not supply a loader.
    #[error("no resource loader is available to load '{0}'")]
    Unavailable(String),

    /// The resource could not be fetched or evaluated.
    #[error("failed to load '{url}': {reason}")]
    Failed {
        /// The resource path.
        url: String,
        /// Why it failed.
        reason: String,
    },
}
