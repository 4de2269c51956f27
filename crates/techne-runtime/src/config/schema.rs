//! Configuration schema definitions.
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "pretty"
//!
//! [plugins]
//! enabled = ["theme-manager", "slides"]
//! dependency_policy = "lenient"
//! init_timeout_ms = 5000
//!
//! [[plugins.manifest]]
//! id = "theme-manager"
//! entry = "plugins/theme-manager.js"
//! enabledByDefault = true
//!
//! [[plugins.manifest]]
//! id = "slides"
//! entry = "plugins/slides.js"
//! dependencies = ["markdown"]
//!
//! [settings]
//! backend = "file"
//! dir = "/var/lib/techne"
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use techne_core::{
    DEFAULT_MAX_EMIT_DEPTH, DependencyPolicy, EnabledSelection, LifecycleOptions, ManifestEntry,
};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TechneConfig {
    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Manifest, selection and lifecycle tunables.
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Settings persistence.
    #[serde(default)]
    pub settings: SettingsConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// `logging.file_path`, rotated per `logging.rotation`.
    File,
}

/// Rotation of the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file for `output = "file"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Include thread ids in each line.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line number in each line.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-module levels, e.g. `techne_core = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: HashMap::new(),
        }
    }
}

// =============================================================================
// Plugins
// =============================================================================

/// Plugin manifest and lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Plugins known to the host.
    #[serde(default)]
    pub manifest: Vec<ManifestEntry>,

    /// Which plugins `start` enables; falls back to `enabledByDefault`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<EnabledSelection>,

    #[serde(default)]
    pub dependency_policy: DependencyPolicy,

    /// Upper bound on a single `init`/`destroy`, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_timeout_ms: Option<u64>,

    /// Cap on nested event emission.
    #[serde(default = "default_max_emit_depth")]
    pub max_emit_depth: usize,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            manifest: Vec::new(),
            enabled: None,
            dependency_policy: DependencyPolicy::default(),
            init_timeout_ms: None,
            max_emit_depth: default_max_emit_depth(),
        }
    }
}

fn default_max_emit_depth() -> usize {
    DEFAULT_MAX_EMIT_DEPTH
}

impl PluginsConfig {
    pub fn init_timeout(&self) -> Option<Duration> {
        self.init_timeout_ms.map(Duration::from_millis)
    }

    /// Converts to the core's lifecycle options.
    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            dependency_policy: self.dependency_policy,
            init_timeout: self.init_timeout(),
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Durable medium for plugin settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsBackendKind {
    /// Process-lifetime only.
    #[default]
    Memory,
    /// One JSON file per key under `settings.dir`.
    File,
}

/// Settings persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default)]
    pub backend: SettingsBackendKind,

    /// Directory for the file backend; defaults to `<data dir>/techne`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Overrides the key the settings map is stored under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SettingsConfig {
    /// Directory the file backend writes to.
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        self.dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("techne")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = TechneConfig::default();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.plugins.max_emit_depth, DEFAULT_MAX_EMIT_DEPTH);
        assert_eq!(config.plugins.dependency_policy, DependencyPolicy::Lenient);
        assert_eq!(config.settings.backend, SettingsBackendKind::Memory);
        assert!(config.plugins.init_timeout().is_none());
    }

    #[test]
    fn test_plugins_section_deserializes() {
        let plugins: PluginsConfig = serde_json::from_value(json!({
            "manifest": [
                {"id": "markdown", "entry": "markdown.js", "enabledByDefault": true},
                {"id": "slides", "entry": "slides.js", "dependencies": ["markdown"]}
            ],
            "enabled": {"slides": {"enabled": true}},
            "dependency_policy": "strict",
            "init_timeout_ms": 250
        }))
        .unwrap();

        assert_eq!(plugins.manifest.len(), 2);
        assert!(matches!(plugins.enabled, Some(EnabledSelection::Map(_))));
        let options = plugins.lifecycle_options();
        assert_eq!(options.dependency_policy, DependencyPolicy::Strict);
        assert_eq!(options.init_timeout, Some(Duration::from_millis(250)));
    }
}
