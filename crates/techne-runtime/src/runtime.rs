//! Host runtime that wires configuration, logging and settings persistence
//! into a [`PluginSystem`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use techne_runtime::TechneRuntime;
//!
//! // Loads techne.toml from the current directory, if any
//! let runtime = TechneRuntime::new();
//!
//! // Explicit file and profile
//! let runtime = TechneRuntime::builder()
//!     .config_file("config/techne.toml")
//!     .profile("production")
//!     .build()?;
//!
//! // Pre-loaded config
//! let config = load_config()?;
//! let runtime = TechneRuntime::from_config(&config)?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, SettingsBackendKind, TechneConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;
use techne_core::{
    FileBackend, HostExtensions, MemoryBackend, PluginDescriptor, PluginSystem, ResourceLoader,
    SettingsBackend, SettingsError, StartOptions, StartReport,
};

/// A configured plugin host.
///
/// # Simple Usage
///
/// ```rust,ignore
/// let runtime = TechneRuntime::new();
///
/// runtime.register(PluginDescriptor::new("theme-manager", ThemeManager))?;
/// runtime.run().await?;
/// ```
pub struct TechneRuntime {
    config: TechneConfig,
    system: Arc<PluginSystem>,
}

impl TechneRuntime {
    /// Creates a runtime from `techne.toml` in the current directory or the
    /// user config directory.
    ///
    /// Falls back to defaults when the file is missing or invalid.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .with_user_config_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                TechneConfig::default()
            });

        Self::from_config(&config).unwrap_or_else(|e| {
            warn!(error = %e, "Configuration rejected, using defaults");
            Self::assemble(TechneConfig::default(), Parts::default())
        })
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Validates `config`, initializes logging and builds the plugin system.
    pub fn from_config(config: &TechneConfig) -> RuntimeResult<Self> {
        Self::with_parts(config.clone(), Parts::default())
    }

    fn with_parts(config: TechneConfig, mut parts: Parts) -> RuntimeResult<Self> {
        validate_config(&config)?;
        logging::init_from_config(&config.logging);

        if parts.backend.is_none() {
            parts.backend = Some(Self::create_backend(&config)?);
        }

        Ok(Self::assemble(config, parts))
    }

    fn assemble(config: TechneConfig, parts: Parts) -> Self {
        let plugins = &config.plugins;
        let mut builder = PluginSystem::builder()
            .manifest(plugins.manifest.clone())
            .max_emit_depth(plugins.max_emit_depth)
            .options(plugins.lifecycle_options());

        if let Some(backend) = parts.backend {
            builder = builder.backend(backend);
        }
        if let Some(loader) = parts.loader {
            builder = builder.loader(loader);
        }
        if let Some(extensions) = parts.extensions {
            builder = builder.extensions(extensions);
        }
        if let Some(namespace) = &config.settings.namespace {
            builder = builder.settings_key(namespace.clone());
        }

        info!(
            log_level = %config.logging.level,
            manifest = plugins.manifest.len(),
            policy = ?plugins.dependency_policy,
            "Runtime initialized from configuration"
        );

        Self {
            system: Arc::new(builder.build()),
            config,
        }
    }

    fn create_backend(config: &TechneConfig) -> RuntimeResult<Arc<dyn SettingsBackend>> {
        match config.settings.backend {
            SettingsBackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
            SettingsBackendKind::File => {
                let Some(dir) = config.settings.resolved_dir() else {
                    return Err(SettingsError::Unavailable(
                        "no directory for the file settings backend".into(),
                    )
                    .into());
                };
                std::fs::create_dir_all(&dir).map_err(SettingsError::from)?;
                debug!(dir = %dir.display(), "Using file settings backend");
                Ok(Arc::new(FileBackend::new(dir)))
            }
        }
    }

    pub fn config(&self) -> &TechneConfig {
        &self.config
    }

    /// The underlying plugin system, shareable with tasks.
    pub fn system(&self) -> &Arc<PluginSystem> {
        &self.system
    }

    /// Registers a plugin descriptor.
    pub fn register(&self, descriptor: PluginDescriptor) -> RuntimeResult<()> {
        self.system.register(descriptor)?;
        Ok(())
    }

    /// Registers several descriptors, stopping at the first rejected one.
    pub fn register_all<I>(&self, descriptors: I) -> RuntimeResult<()>
    where
        I: IntoIterator<Item = PluginDescriptor>,
    {
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        Ok(())
    }

    /// Enables the configured selection, or the manifest defaults.
    pub async fn start(&self) -> StartReport {
        let options = StartOptions {
            enabled: self.config.plugins.enabled.clone(),
        };
        let report = self.system.start(options).await;

        for failure in &report.failed {
            error!(error = %failure, "Plugin failed to start");
        }
        info!(
            status = %report.status(),
            enabled = report.enabled.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Plugins started"
        );

        report
    }

    /// Disables every enabled plugin, most recently enabled first.
    pub async fn shutdown(&self) -> Vec<String> {
        info!("Stopping Techne runtime");
        let disabled = self.system.stop().await;
        info!(disabled = disabled.len(), "Runtime stopped");
        disabled
    }

    /// Starts, waits for `shutdown`, then stops.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<StartReport>
    where
        F: Future<Output = ()>,
    {
        let report = self.start().await;
        shutdown.await;
        self.shutdown().await;
        Ok(report)
    }

    /// Starts and runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<StartReport> {
        let report = self.start().await;

        info!("Techne runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;

        self.shutdown().await;
        Ok(report)
    }
}

impl Default for TechneRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

#[derive(Default)]
struct Parts {
    backend: Option<Arc<dyn SettingsBackend>>,
    loader: Option<Arc<dyn ResourceLoader>>,
    extensions: Option<HostExtensions>,
}

/// Builder for a [`TechneRuntime`] with custom configuration sources and
/// embedder-supplied collaborators.
///
/// ```rust,ignore
/// let runtime = TechneRuntime::builder()
///     .config_file("techne.toml")
///     .loader(Arc::new(MyScriptLoader))
///     .extensions(HostExtensions::new().with("clipboard", clipboard))
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    parts: Parts,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir().with_user_config_dir(),
            parts: Parts::default(),
        }
    }

    /// Loads this file instead of searching.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Selects a profile such as "development" or "production".
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Reads `TECHNE_*` environment variables (the default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a configuration fragment on top of every other source.
    pub fn merge<T: Serialize>(mut self, overrides: T) -> Self {
        self.config_loader = self.config_loader.merge(overrides);
        self
    }

    /// Overrides one value by dotted key, e.g. `"plugins.dependency_policy"`.
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    /// Replaces the settings backend chosen by `settings.backend`.
    pub fn backend(mut self, backend: Arc<dyn SettingsBackend>) -> Self {
        self.parts.backend = Some(backend);
        self
    }

    /// Loader behind `Host::load_script` and `Host::load_css`.
    pub fn loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.parts.loader = Some(loader);
        self
    }

    /// Initial host capabilities.
    pub fn extensions(mut self, extensions: HostExtensions) -> Self {
        self.parts.extensions = Some(extensions);
        self
    }

    pub fn build(self) -> RuntimeResult<TechneRuntime> {
        let config = self.config_loader.load()?;
        TechneRuntime::with_parts(config, self.parts)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
