//! The capability surface handed to each plugin's `init`.
//!
//! A [`Host`] is built fresh for every enable transition and is bound to one
//! plugin id.  It exposes:
//!
//! - `log` / `warn` / `error`, tagged with the plugin id
//! - `on` / `off` / `emit` on the shared [`EventBus`]
//! - `get_settings` / `set_settings` for the plugin's own settings slice
//! - `load_script` / `load_css` / `load_scripts_sequential` via the
//!   embedder's [`ResourceLoader`]
//! - whatever the embedder merged in with
//!   [`PluginSystem::extend_host`](crate::lifecycle::PluginSystem::extend_host)
//!
//! It holds no reference to the registry or to other plugins.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::bus::{EventBus, Listener, Subscription};
use crate::error::{BoxError, LoadError};
use crate::loader::ResourceLoader;
use crate::settings::SettingsStore;

// ─── HostExtensions ───────────────────────────────────────────────────────────

type Capability = Arc<dyn Any + Send + Sync>;

/// Extra capabilities merged into every subsequently built [`Host`].
///
/// # Example
///
/// ```rust,ignore
/// struct ThemeApi { /* … */ }
///
/// system.extend_host(HostExtensions::new().with("theme", ThemeApi::new()));
///
/// // inside a plugin's init:
/// let theme: Arc<ThemeApi> = host.capability("theme").ok_or("no theme api")?;
/// ```
#[derive(Clone, Default)]
pub struct HostExtensions {
    entries: HashMap<String, Capability>,
}

impl std::fmt::Debug for HostExtensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("HostExtensions").field("keys", &keys).finish()
    }
}

impl HostExtensions {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` under `key`, replacing any previous value.
    pub fn with<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, Arc::new(value));
        self
    }

    /// Adds an already shared value under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.entries.insert(key.into(), value);
    }

    /// Merges `other` into `self`; values from `other` win.
    pub fn merge(&mut self, other: HostExtensions) {
        self.entries.extend(other.entries);
    }

    /// Looks up `key` and downcasts it to `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Sorted list of keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of capabilities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no capabilities.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Host ─────────────────────────────────────────────────────────────────────

/// Per-plugin view of the host application.
#[derive(Clone)]
pub struct Host {
    plugin_id: Arc<str>,
    bus: EventBus,
    settings: SettingsStore,
    loader: Arc<dyn ResourceLoader>,
    extensions: Arc<HostExtensions>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("plugin_id", &self.plugin_id)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

impl Host {
    pub(crate) fn new(
        plugin_id: &str,
        bus: EventBus,
        settings: SettingsStore,
        loader: Arc<dyn ResourceLoader>,
        extensions: Arc<HostExtensions>,
    ) -> Self {
        Self {
            plugin_id: Arc::from(plugin_id),
            bus,
            settings,
            loader,
            extensions,
        }
    }

    /// Id of the plugin this host is bound to.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    // ─── Logging ─────────────────────────────────────────────────────────────

    pub fn log(&self, message: impl Display) {
        info!(target: "techne::plugin", plugin = %self.plugin_id, "[{}] {}", self.plugin_id, message);
    }

    pub fn warn(&self, message: impl Display) {
        warn!(target: "techne::plugin", plugin = %self.plugin_id, "[{}] {}", self.plugin_id, message);
    }

    pub fn error(&self, message: impl Display) {
        error!(target: "techne::plugin", plugin = %self.plugin_id, "[{}] {}", self.plugin_id, message);
    }

    // ─── Event bus ───────────────────────────────────────────────────────────

    /// Subscribes to `event` on the shared bus.
    pub fn on<F>(&self, event: &str, listener: F) -> Subscription
    where
        F: Fn(&Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.bus.on(event, listener)
    }

    /// Subscribes a shared listener, so it can later be passed to [`off`](Self::off).
    pub fn on_shared(&self, event: &str, listener: Listener) -> Subscription {
        self.bus.on_shared(event, listener)
    }

    /// Removes `listener` from `event`.
    pub fn off(&self, event: &str, listener: &Listener) -> usize {
        self.bus.off(event, listener)
    }

    /// Emits `event` on the shared bus.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        self.bus.emit(event, payload)
    }

    // ─── Settings ────────────────────────────────────────────────────────────

    /// This plugin's stored settings.
    pub fn get_settings(&self) -> Option<Value> {
        self.settings.get_plugin_settings(&self.plugin_id)
    }

    /// Deserialises this plugin's settings into `T`, falling back to
    /// `T::default()` when absent or malformed.
    pub fn settings_as<T>(&self) -> T
    where
        T: DeserializeOwned + Default,
    {
        self.get_settings()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    /// Replaces this plugin's stored settings.
    pub fn set_settings(&self, value: Value) {
        self.settings.set_plugin_settings(&self.plugin_id, value);
    }

    // ─── Resources ───────────────────────────────────────────────────────────

    pub async fn load_script(&self, src: &str) -> Result<(), LoadError> {
        self.loader.load_script(src).await
    }

    pub async fn load_css(&self, href: &str) -> Result<(), LoadError> {
        self.loader.load_css(href).await
    }

    pub async fn load_scripts_sequential(&self, srcs: &[String]) -> Result<(), LoadError> {
        self.loader.load_scripts_sequential(srcs).await
    }

    // ─── Extensions ──────────────────────────────────────────────────────────

    /// Looks up an embedder-supplied capability.
    pub fn capability<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.extensions.get(key)
    }

    /// Whether an embedder-supplied capability named `key` exists.
    pub fn has_capability(&self, key: &str) -> bool {
        self.extensions.contains(key)
    }

    /// Names of every embedder-supplied capability.
    pub fn capability_keys(&self) -> Vec<String> {
        self.extensions.keys()
    }
}
