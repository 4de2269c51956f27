//! Plugin lifecycle management.
//!
//! [`PluginSystem`] is the explicit context object an embedding application
//! owns.  It holds the registry, the event bus, the settings store and the
//! host extensions, and it drives every state transition:
//!
//! - [`start`](PluginSystem::start) enables a batch in dependency order.
//! - [`enable_plugin`](PluginSystem::enable_plugin) and
//!   [`disable_plugin`](PluginSystem::disable_plugin) run single transitions.
//! - [`stop`](PluginSystem::stop) disables everything in reverse enable order.
//!
//! Transitions are serialized: at most one `init` or `destroy` runs at a
//! time, and a slow plugin delays the rest of its batch.  A failing hook is
//! isolated to its plugin.  It is recorded as that plugin's state and last
//! error, published as `plugin:error`, and processing continues.
//!
//! # Example
//!
//! ```rust,ignore
//! use techne_core::{EnabledSelection, PluginDescriptor, PluginSystem, StartOptions};
//!
//! let system = PluginSystem::builder().manifest(manifest).build();
//! system.register(PluginDescriptor::from_fn("theme", |host| async move {
//!     host.log("theme ready");
//!     Ok(())
//! }))?;
//!
//! let report = system.start(StartOptions::new()).await;
//! println!("{}", report.status());
//! // …later…
//! system.stop().await;
//! ```

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex as TransitionLock;
use tracing::{debug, error, info, warn};

use crate::bus::{DEFAULT_MAX_EMIT_DEPTH, EventBus, Listener, Subscription, panic_message};
use crate::error::{BoxError, LifecycleError, LifecycleResult, RegistrationResult};
use crate::events::{
    PLUGIN_DISABLED, PLUGIN_ENABLED, PLUGIN_ENABLING, PLUGIN_ERROR, PLUGIN_REPLACED,
    PLUGIN_WARNING, PLUGINS_STARTED, PLUGINS_STARTING, PLUGINS_STOPPED,
};
use crate::host::{Host, HostExtensions};
use crate::loader::{ResourceLoader, UnavailableLoader};
use crate::manifest::{EnabledSelection, ManifestEntry};
use crate::plugin::PluginDescriptor;
use crate::registry::{PluginInfo, PluginRegistry, PluginState, RegisterOutcome};
use crate::resolver::{Resolution, ResolutionWarning};
use crate::settings::{MemoryBackend, SETTINGS_KEY, SettingsBackend, SettingsStore, ThemePreference};

// =============================================================================
// Options
// =============================================================================

/// What happens to a plugin whose dependency is unregistered or failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyPolicy {
    /// The dependent is initialized anyway and a `plugin:warning` is emitted.
    #[default]
    Lenient,
    /// The dependent is moved to `error` without calling its `init`.
    Strict,
}

/// Tunables for lifecycle transitions.
#[derive(Debug, Clone, Default)]
pub struct LifecycleOptions {
    pub dependency_policy: DependencyPolicy,
    /// Upper bound on a single `init` or `destroy`.  `None` waits forever.
    pub init_timeout: Option<Duration>,
}

/// Arguments to [`PluginSystem::start`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Which plugins to enable; `None` uses the manifest's
    /// `enabledByDefault` flags.
    pub enabled: Option<EnabledSelection>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables exactly `ids`, plus their registered dependencies.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: Some(EnabledSelection::ids(ids)),
        }
    }
}

impl From<EnabledSelection> for StartOptions {
    fn from(selection: EnabledSelection) -> Self {
        Self {
            enabled: Some(selection),
        }
    }
}

// =============================================================================
// Start report
// =============================================================================

/// Summary status for a host UI once `start` has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyStatus {
    /// Everything requested is enabled and nothing was reported.
    Ready,
    /// At least one plugin ended in `error`.
    ReadyWithErrors,
    /// No errors, but something requested was skipped or a warning was raised.
    Partial,
}

impl fmt::Display for ReadyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::ReadyWithErrors => "ready with errors",
            Self::Partial => "ready (partial)",
        })
    }
}

/// Outcome of one [`PluginSystem::start`] call.
#[derive(Debug, Clone, Default)]
pub struct StartReport {
    /// Batch ids that ended `enabled`, in initialization order.
    pub enabled: Vec<String>,
    /// Failures of this batch, in the order they happened.
    pub failed: Vec<LifecycleError>,
    /// Requested ids that were not attempted (unknown or unregistered).
    pub skipped: Vec<String>,
    /// Rendered resolution and dependency warnings.
    pub warnings: Vec<String>,
}

impl StartReport {
    pub fn status(&self) -> ReadyStatus {
        if !self.failed.is_empty() {
            ReadyStatus::ReadyWithErrors
        } else if !self.skipped.is_empty() || !self.warnings.is_empty() {
            ReadyStatus::Partial
        } else {
            ReadyStatus::Ready
        }
    }
}

// =============================================================================
// PluginSystemBuilder
// =============================================================================

/// Builder for [`PluginSystem`].
pub struct PluginSystemBuilder {
    manifest: Vec<ManifestEntry>,
    backend: Option<Arc<dyn SettingsBackend>>,
    loader: Option<Arc<dyn ResourceLoader>>,
    settings_key: String,
    max_emit_depth: usize,
    extensions: HostExtensions,
    options: LifecycleOptions,
}

impl Default for PluginSystemBuilder {
    fn default() -> Self {
        Self {
            manifest: Vec::new(),
            backend: None,
            loader: None,
            settings_key: SETTINGS_KEY.to_string(),
            max_emit_depth: DEFAULT_MAX_EMIT_DEPTH,
            extensions: HostExtensions::new(),
            options: LifecycleOptions::default(),
        }
    }
}

impl PluginSystemBuilder {
    pub fn manifest(mut self, manifest: Vec<ManifestEntry>) -> Self {
        self.manifest = manifest;
        self
    }

    /// Durable medium for settings.  Defaults to a fresh [`MemoryBackend`].
    pub fn backend(mut self, backend: Arc<dyn SettingsBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Loader behind `host.load_script` and friends.  Defaults to
    /// [`UnavailableLoader`].
    pub fn loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Key the settings map is stored under.
    pub fn settings_key(mut self, key: impl Into<String>) -> Self {
        self.settings_key = key.into();
        self
    }

    pub fn max_emit_depth(mut self, depth: usize) -> Self {
        self.max_emit_depth = depth;
        self
    }

    /// Initial host extensions.
    pub fn extensions(mut self, extensions: HostExtensions) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.options.dependency_policy = policy;
        self
    }

    pub fn init_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.init_timeout = timeout;
        self
    }

    pub fn options(mut self, options: LifecycleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> PluginSystem {
        let bus = EventBus::with_max_depth(self.max_emit_depth);
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let settings = SettingsStore::with_key(Arc::clone(&backend), bus.clone(), self.settings_key);
        let mut registry = PluginRegistry::new();
        registry.set_manifest(self.manifest);

        PluginSystem {
            registry: Mutex::new(registry),
            bus,
            settings,
            backend,
            loader: self.loader.unwrap_or_else(|| Arc::new(UnavailableLoader)),
            extensions: Mutex::new(Arc::new(self.extensions)),
            options: self.options,
            transitions: TransitionLock::new(()),
        }
    }
}

// =============================================================================
// PluginSystem
// =============================================================================

/// How a guarded hook call went wrong.
enum HookFailure {
    Failed(String),
    TimedOut(Duration),
}

/// Registry, bus, settings and host extensions of one plugin system.
///
/// Several independent systems can live in one process.
pub struct PluginSystem {
    registry: Mutex<PluginRegistry>,
    bus: EventBus,
    settings: SettingsStore,
    backend: Arc<dyn SettingsBackend>,
    loader: Arc<dyn ResourceLoader>,
    /// Copy-on-write so hosts already handed out keep their snapshot.
    extensions: Mutex<Arc<HostExtensions>>,
    options: LifecycleOptions,
    /// Serializes `start`, `enable_plugin`, `disable_plugin` and `stop`.
    transitions: TransitionLock<()>,
}

impl fmt::Debug for PluginSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSystem")
            .field("registry", &*self.registry.lock())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for PluginSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginSystem {
    /// Creates a system with an empty manifest and in-memory settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> PluginSystemBuilder {
        PluginSystemBuilder::default()
    }

    pub fn options(&self) -> &LifecycleOptions {
        &self.options
    }

    // ─── Registry ────────────────────────────────────────────────────────────

    /// Registers `descriptor`.  Re-registering an id replaces its descriptor
    /// and emits `plugin:replaced`.
    pub fn register(&self, descriptor: PluginDescriptor) -> RegistrationResult<RegisterOutcome> {
        let id = descriptor.id().to_string();
        let outcome = self.registry.lock().register(descriptor)?;
        if let RegisterOutcome::Replaced { was_enabled } = outcome {
            self.bus
                .emit(PLUGIN_REPLACED, &json!({ "id": id, "enabled": was_enabled }));
        }
        Ok(outcome)
    }

    pub fn get_plugin(&self, id: &str) -> Option<PluginDescriptor> {
        self.registry.lock().get(id)
    }

    /// Registered ids in registration order.
    pub fn list_plugins(&self) -> Vec<String> {
        self.registry.lock().ids()
    }

    /// Copy of the manifest.
    pub fn get_manifest(&self) -> Vec<ManifestEntry> {
        self.registry.lock().manifest()
    }

    /// Replaces the manifest.  Takes effect for subsequent transitions.
    pub fn set_manifest(&self, manifest: Vec<ManifestEntry>) {
        self.registry.lock().set_manifest(manifest);
    }

    pub fn manifest_entry(&self, id: &str) -> Option<ManifestEntry> {
        self.registry.lock().manifest_entry(id).cloned()
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.registry.lock().is_enabled(id)
    }

    /// Enabled ids in enable order.
    pub fn get_enabled(&self) -> Vec<String> {
        self.registry.lock().enabled()
    }

    pub fn plugin_state(&self, id: &str) -> PluginState {
        self.registry.lock().state(id)
    }

    pub fn last_error(&self, id: &str) -> Option<LifecycleError> {
        self.registry.lock().last_error(id)
    }

    pub fn plugin_info(&self, id: &str) -> Option<PluginInfo> {
        self.registry.lock().info(id)
    }

    // ─── Bus ─────────────────────────────────────────────────────────────────

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn on<F>(&self, event: &str, listener: F) -> Subscription
    where
        F: Fn(&Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.bus.on(event, listener)
    }

    pub fn on_shared(&self, event: &str, listener: Listener) -> Subscription {
        self.bus.on_shared(event, listener)
    }

    pub fn off(&self, event: &str, listener: &Listener) -> usize {
        self.bus.off(event, listener)
    }

    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        self.bus.emit(event, payload)
    }

    // ─── Settings ────────────────────────────────────────────────────────────

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Settings of any plugin; there is no access control between plugins.
    pub fn get_plugin_settings(&self, id: &str) -> Option<Value> {
        self.settings.get_plugin_settings(id)
    }

    pub fn set_plugin_settings(&self, id: &str, value: Value) {
        self.settings.set_plugin_settings(id, value);
    }

    /// The persisted top-level theme id, on the same backend as settings.
    pub fn theme_preference(&self) -> ThemePreference {
        ThemePreference::new(Arc::clone(&self.backend))
    }

    // ─── Host extensions ─────────────────────────────────────────────────────

    /// Merges `extensions` into every host built from now on.  Later values
    /// win per key; hosts already handed to plugins are not touched.
    pub fn extend_host(&self, extensions: HostExtensions) {
        let mut current = self.extensions.lock();
        let mut merged = HostExtensions::clone(&current);
        debug!(keys = ?extensions.keys(), "Extending host capabilities");
        merged.merge(extensions);
        *current = Arc::new(merged);
    }

    /// Current extension set.
    pub fn host_extensions(&self) -> Arc<HostExtensions> {
        Arc::clone(&*self.extensions.lock())
    }

    fn build_host(&self, id: &str) -> Host {
        Host::new(
            id,
            self.bus.clone(),
            self.settings.clone(),
            Arc::clone(&self.loader),
            self.host_extensions(),
        )
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Enables the selected plugins in dependency order.
    ///
    /// Never fails as a whole.  Individual failures are recorded per plugin,
    /// published on the bus and listed in the returned report.
    pub async fn start(&self, options: StartOptions) -> StartReport {
        let _transition = self.transitions.lock().await;

        let (manifest, resolution) = {
            let registry = self.registry.lock();
            let known = registry.stable_ids();
            let requested: Vec<String> = match &options.enabled {
                Some(selection) => selection.requested(&known, |id| registry.default_enabled(id)),
                None => known
                    .iter()
                    .filter(|id| registry.default_enabled(id))
                    .cloned()
                    .collect(),
            };
            (registry.manifest(), registry.dependency_graph().resolve(&requested))
        };

        info!(
            plugins = resolution.order.len(),
            skipped = resolution.skipped.len(),
            "Starting plugins"
        );
        self.bus.emit(
            PLUGINS_STARTING,
            &serde_json::to_value(&manifest).unwrap_or(Value::Array(Vec::new())),
        );

        let mut report = StartReport {
            skipped: resolution.skipped.clone(),
            ..StartReport::default()
        };
        for warning in &resolution.warnings {
            self.publish_warning(warning);
            report.warnings.push(warning.to_string());
        }

        for id in &resolution.order {
            if let Err(e) = self.enable_one(id, &resolution, &mut report.warnings).await {
                report.failed.push(e);
            }
        }

        report.enabled = {
            let registry = self.registry.lock();
            resolution
                .order
                .iter()
                .filter(|id| registry.is_enabled(id))
                .cloned()
                .collect()
        };

        info!(
            enabled = report.enabled.len(),
            failed = report.failed.len(),
            status = %report.status(),
            "Plugins started"
        );
        self.bus
            .emit(PLUGINS_STARTED, &json!({ "enabled": report.enabled }));
        report
    }

    /// Enables `id` after any of its registered dependencies that are not
    /// yet enabled.
    ///
    /// Returns `Err` only when `id` is not registered.  An `init` failure
    /// yields `Ok(PluginState::Error)`; an already enabled plugin is left
    /// alone and yields `Ok(PluginState::Enabled)`.
    pub async fn enable_plugin(&self, id: &str) -> LifecycleResult<PluginState> {
        let _transition = self.transitions.lock().await;

        let resolution = {
            let registry = self.registry.lock();
            match registry.state(id) {
                PluginState::Unregistered => {
                    warn!(plugin = %id, "Cannot enable unregistered plugin");
                    return Err(LifecycleError::NotRegistered { id: id.to_string() });
                }
                PluginState::Enabled => return Ok(PluginState::Enabled),
                _ => {}
            }
            registry.dependency_graph().resolve(&[id.to_string()])
        };

        let mut warnings = Vec::new();
        for warning in &resolution.warnings {
            self.publish_warning(warning);
        }
        for dep in &resolution.order {
            // Failures are already recorded and published.
            let _ = self.enable_one(dep, &resolution, &mut warnings).await;
        }
        Ok(self.plugin_state(id))
    }

    /// Disables `id` if it is enabled.
    ///
    /// `destroy` failures are published but never block the transition.
    /// Returns `Err` only when `id` is not registered.  Dependents are not
    /// disabled.
    pub async fn disable_plugin(&self, id: &str) -> LifecycleResult<PluginState> {
        let _transition = self.transitions.lock().await;
        if self.plugin_state(id) == PluginState::Unregistered {
            warn!(plugin = %id, "Cannot disable unregistered plugin");
            return Err(LifecycleError::NotRegistered { id: id.to_string() });
        }
        Ok(self.disable_one(id).await)
    }

    /// Disables every enabled plugin in reverse enable order and returns
    /// their ids in the order they were disabled.
    pub async fn stop(&self) -> Vec<String> {
        let _transition = self.transitions.lock().await;

        let mut ids = self.get_enabled();
        ids.reverse();
        info!(plugins = ids.len(), "Stopping plugins");

        for id in &ids {
            self.disable_one(id).await;
        }

        self.bus.emit(PLUGINS_STOPPED, &json!({ "disabled": ids }));
        ids
    }

    // ─── Transitions ─────────────────────────────────────────────────────────

    /// One `enable` transition.  Returns the recorded error on failure.
    async fn enable_one(
        &self,
        id: &str,
        resolution: &Resolution,
        warnings: &mut Vec<String>,
    ) -> LifecycleResult<()> {
        let (plugin, unavailable) = {
            let mut registry = self.registry.lock();
            let state = registry.state(id);
            if state == PluginState::Unregistered {
                return Err(LifecycleError::NotRegistered { id: id.to_string() });
            }
            if !state.can_enable() {
                return Ok(());
            }

            let unavailable: Vec<(String, bool)> = registry
                .dependencies(id)
                .iter()
                .filter(|dep| !resolution.is_broken(id, dep) && !registry.is_enabled(dep))
                .map(|dep| (dep.clone(), registry.contains(dep)))
                .collect();

            if self.options.dependency_policy == DependencyPolicy::Strict {
                if let Some((dependency, _)) = unavailable.first() {
                    let e = LifecycleError::DependencyUnavailable {
                        id: id.to_string(),
                        dependency: dependency.clone(),
                    };
                    registry.fail(id, e.clone());
                    drop(registry);
                    self.publish_error(&e);
                    return Err(e);
                }
            }

            match registry.begin_enable(id) {
                Some(plugin) => (plugin, unavailable),
                None => return Err(LifecycleError::NotRegistered { id: id.to_string() }),
            }
        };

        // Unregistered dependencies were already reported by the resolver.
        for (dependency, registered) in unavailable {
            if !registered {
                continue;
            }
            warn!(
                plugin = %id,
                dependency = %dependency,
                "Dependency is not enabled; initializing plugin anyway"
            );
            warnings.push(format!(
                "plugin '{id}' initialized without its dependency '{dependency}'"
            ));
            self.bus.emit(
                PLUGIN_WARNING,
                &json!({ "kind": "dependency", "plugin": id, "dependency": dependency }),
            );
        }

        self.bus.emit(PLUGIN_ENABLING, &json!({ "id": id }));
        debug!(plugin = %id, "Initializing plugin");

        let host = self.build_host(id);
        match self.guarded(plugin.init(host)).await {
            Ok(()) => {
                self.registry.lock().finish_enable(id, plugin);
                info!(plugin = %id, "Plugin enabled");
                self.bus.emit(PLUGIN_ENABLED, &json!({ "id": id }));
                Ok(())
            }
            Err(failure) => {
                let e = match failure {
                    HookFailure::Failed(reason) => LifecycleError::InitFailed {
                        id: id.to_string(),
                        reason,
                    },
                    HookFailure::TimedOut(limit) => LifecycleError::InitTimedOut {
                        id: id.to_string(),
                        millis: limit.as_millis(),
                    },
                };
                self.registry.lock().fail(id, e.clone());
                self.publish_error(&e);
                Err(e)
            }
        }
    }

    /// One `disable` transition; a no-op unless `id` is enabled.
    async fn disable_one(&self, id: &str) -> PluginState {
        let instance = {
            let mut registry = self.registry.lock();
            let state = registry.state(id);
            if state != PluginState::Enabled {
                debug!(plugin = %id, state = %state, "Plugin not enabled, nothing to disable");
                return state;
            }
            registry.begin_disable(id)
        };

        let error = match instance {
            Some(plugin) => match self.guarded(plugin.destroy()).await {
                Ok(()) => None,
                Err(HookFailure::Failed(reason)) => Some(LifecycleError::DestroyFailed {
                    id: id.to_string(),
                    reason,
                }),
                Err(HookFailure::TimedOut(limit)) => Some(LifecycleError::DestroyFailed {
                    id: id.to_string(),
                    reason: format!("timed out after {}ms", limit.as_millis()),
                }),
            },
            None => None,
        };

        self.registry.lock().finish_disable(id, error.clone());

        match &error {
            Some(e) => {
                self.publish_error(e);
                self.bus.emit(
                    PLUGIN_DISABLED,
                    &json!({ "id": id, "error": e.to_string() }),
                );
            }
            None => {
                info!(plugin = %id, "Plugin disabled");
                self.bus.emit(PLUGIN_DISABLED, &json!({ "id": id }));
            }
        }
        PluginState::Disabled
    }

    /// Awaits a plugin hook, turning errors, panics and timeouts into a
    /// [`HookFailure`].
    async fn guarded<F>(&self, hook: F) -> Result<(), HookFailure>
    where
        F: Future<Output = Result<(), BoxError>>,
    {
        let hook = AssertUnwindSafe(hook).catch_unwind();
        let outcome = match self.options.init_timeout {
            Some(limit) => match tokio::time::timeout(limit, hook).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(HookFailure::TimedOut(limit)),
            },
            None => hook.await,
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HookFailure::Failed(e.to_string())),
            Err(panic) => Err(HookFailure::Failed(format!(
                "panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    fn publish_error(&self, e: &LifecycleError) {
        error!(plugin = %e.plugin_id(), phase = e.phase(), error = %e, "Plugin lifecycle error");
        self.bus.emit(
            PLUGIN_ERROR,
            &json!({ "id": e.plugin_id(), "error": e.to_string(), "phase": e.phase() }),
        );
    }

    fn publish_warning(&self, warning: &ResolutionWarning) {
        warn!(warning = %warning, "Plugin resolution warning");
        self.bus.emit(PLUGIN_WARNING, &warning.to_payload());
    }
}
