//! # Techne Core
//!
//! Plugin runtime core for the Techne plugin system.
//!
//! This crate provides:
//! - An in-process, synchronous, reentrant event bus (`EventBus`)
//! - A per-plugin settings store over a pluggable durable backend
//! - The plugin contract (`Plugin`) and registered descriptors
//! - Manifest handling and a dependency resolver with cycle breaking
//! - A lifecycle manager (`PluginSystem`) that enables and disables plugins
//!   in dependency order while isolating per-plugin failures
//! - The `Host` capability surface handed to each plugin's `init`
//!
//! Loading plugin code is the embedder's job; the core only orchestrates
//! plugins once their descriptors are registered.

pub mod bus;
pub mod error;
pub mod events;
pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod settings;

pub use bus::{DEFAULT_MAX_EMIT_DEPTH, EventBus, Listener, Subscription};
pub use error::{
    BoxError, LifecycleError, LifecycleResult, LoadError, RegistrationError, RegistrationResult,
    SettingsError, SettingsResult,
};
pub use host::{Host, HostExtensions};
pub use lifecycle::{
    DependencyPolicy, LifecycleOptions, PluginSystem, PluginSystemBuilder, ReadyStatus,
    StartOptions, StartReport,
};
pub use loader::{ResourceLoader, UnavailableLoader};
pub use manifest::{EnabledFlag, EnabledSelection, ManifestEntry};
pub use plugin::{FnPlugin, Plugin, PluginDescriptor};
pub use registry::{PluginInfo, PluginRegistry, PluginState, RegisterOutcome};
pub use resolver::{DependencyGraph, Resolution, ResolutionWarning};
pub use settings::{
    FileBackend, MemoryBackend, SETTINGS_KEY, SettingsBackend, SettingsStore, THEME_KEY,
    ThemePreference,
};

// Re-exported so plugin crates can implement `Plugin` without a direct dependency.
pub use async_trait::async_trait;
