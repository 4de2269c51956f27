//! Registered descriptors, the manifest and per-plugin runtime state.
//!
//! [`PluginRegistry`] is plain data.  It never runs plugin code; the
//! [`PluginSystem`](crate::lifecycle::PluginSystem) owns it behind a lock and
//! performs every state transition.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LifecycleError, RegistrationResult};
use crate::manifest::ManifestEntry;
use crate::plugin::{Plugin, PluginDescriptor};
use crate::resolver::DependencyGraph;

// =============================================================================
// PluginState
// =============================================================================

/// Runtime status of a plugin id.
///
/// ```text
/// register() ──► Registered
///   enable   ──► Enabling ──► Enabled
///                         └─► Error
///   disable  ──► Disabling ──► Disabled
///   enable (from Disabled or Error) ──► Enabling ──► …
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Nothing is registered under the id.
    Unregistered,
    /// Registered and never enabled.
    Registered,
    /// `init` is running.
    Enabling,
    /// `init` succeeded.
    Enabled,
    /// `destroy` is running.
    Disabling,
    /// Disabled after having been enabled.
    Disabled,
    /// The last enable attempt failed.
    Error,
}

impl PluginState {
    /// Lowercase name, as used in event payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Enabling => "enabling",
            Self::Enabled => "enabled",
            Self::Disabling => "disabling",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }

    /// Whether an enable attempt may start from this state.
    pub fn can_enable(self) -> bool {
        matches!(self, Self::Registered | Self::Disabled | Self::Error)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: Option<String>,
    pub version: Option<String>,
    pub state: PluginState,
    pub last_error: Option<String>,
}

/// What [`PluginRegistry::register`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The id was new.
    Registered,
    /// An existing descriptor was replaced.  `was_enabled` tells whether the
    /// plugin kept running its previously initialized instance.
    Replaced { was_enabled: bool },
}

// =============================================================================
// PluginRegistry
// =============================================================================

struct RegistryEntry {
    descriptor: PluginDescriptor,
    state: PluginState,
    /// Instance whose `init` succeeded; `destroy` is called on this one.
    active: Option<Arc<dyn Plugin>>,
    last_error: Option<LifecycleError>,
    /// Position in enable order while `Enabled`.
    enabled_seq: u64,
}

/// Descriptors keyed by id, plus the manifest.
#[derive(Default)]
pub struct PluginRegistry {
    entries: HashMap<String, RegistryEntry>,
    /// Ids in first-registration order.
    order: Vec<String>,
    manifest: Vec<ManifestEntry>,
    next_seq: u64,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.order)
            .field("manifest", &self.manifest.len())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry seeded with a manifest.
    pub fn with_manifest(manifest: Vec<ManifestEntry>) -> Self {
        Self {
            manifest,
            ..Self::default()
        }
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Validates and stores `descriptor`.
    ///
    /// Registering an id twice replaces the descriptor (last write wins).
    /// The state is kept: an enabled plugin keeps running the instance that
    /// was initialized and picks up the new descriptor on its next
    /// disable/enable cycle.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> RegistrationResult<RegisterOutcome> {
        descriptor.validate()?;
        let id = descriptor.id().to_string();

        if let Some(entry) = self.entries.get_mut(&id) {
            let was_enabled = entry.state == PluginState::Enabled;
            entry.descriptor = descriptor;
            if was_enabled {
                warn!(
                    plugin = %id,
                    "Plugin re-registered while enabled; new descriptor applies after the next disable/enable cycle"
                );
            } else {
                warn!(plugin = %id, state = %entry.state, "Plugin re-registered; descriptor replaced");
            }
            return Ok(RegisterOutcome::Replaced { was_enabled });
        }

        self.entries.insert(
            id.clone(),
            RegistryEntry {
                descriptor,
                state: PluginState::Registered,
                active: None,
                last_error: None,
                enabled_seq: 0,
            },
        );
        info!(plugin = %id, "Plugin registered");
        self.order.push(id);
        Ok(RegisterOutcome::Registered)
    }

    /// The descriptor registered under `id`.
    pub fn get(&self, id: &str) -> Option<PluginDescriptor> {
        self.entries.get(id).map(|e| e.descriptor.clone())
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered ids in first-registration order.
    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    // ─── Manifest ────────────────────────────────────────────────────────────

    /// Copy of the manifest.
    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.manifest.clone()
    }

    /// Replaces the manifest.  Duplicate ids keep their first entry.
    pub fn set_manifest(&mut self, manifest: Vec<ManifestEntry>) {
        let mut seen = HashSet::new();
        self.manifest = manifest
            .into_iter()
            .filter(|entry| {
                let fresh = seen.insert(entry.id.clone());
                if !fresh {
                    warn!(plugin = %entry.id, "Duplicate manifest entry ignored");
                }
                fresh
            })
            .collect();
    }

    /// The manifest entry for `id`.
    pub fn manifest_entry(&self, id: &str) -> Option<&ManifestEntry> {
        self.manifest.iter().find(|entry| entry.id == id)
    }

    /// Declared dependencies of `id`; empty when not in the manifest.
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.manifest_entry(id)
            .map(|entry| entry.dependencies.as_slice())
            .unwrap_or_default()
    }

    /// The manifest's `enabledByDefault` for `id`.
    pub fn default_enabled(&self, id: &str) -> bool {
        self.manifest_entry(id).is_some_and(|entry| entry.enabled_by_default)
    }

    /// Every known id in stable order: manifest order first, then
    /// registered ids missing from the manifest in registration order.
    pub fn stable_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.manifest
            .iter()
            .map(|entry| &entry.id)
            .chain(self.order.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    /// Builds the dependency graph over every known id.
    pub fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for id in self.stable_ids() {
            let deps = self.dependencies(&id).to_vec();
            let registered = self.contains(&id);
            graph.add_node(id, deps, registered);
        }
        graph
    }

    // ─── State ───────────────────────────────────────────────────────────────

    /// Current state; `Unregistered` for unknown ids.
    pub fn state(&self, id: &str) -> PluginState {
        self.entries
            .get(id)
            .map_or(PluginState::Unregistered, |e| e.state)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.state(id) == PluginState::Enabled
    }

    /// Enabled ids, in the order they were enabled.
    pub fn enabled(&self) -> Vec<String> {
        let mut enabled: Vec<(&String, u64)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == PluginState::Enabled)
            .map(|(id, e)| (id, e.enabled_seq))
            .collect();
        enabled.sort_by_key(|(_, seq)| *seq);
        enabled.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// The error recorded by the last failed transition of `id`.
    pub fn last_error(&self, id: &str) -> Option<LifecycleError> {
        self.entries.get(id).and_then(|e| e.last_error.clone())
    }

    /// Snapshot of `id`, or `None` when it is not registered.
    pub fn info(&self, id: &str) -> Option<PluginInfo> {
        self.entries.get(id).map(|e| PluginInfo {
            id: id.to_string(),
            name: e.descriptor.name().map(str::to_string),
            version: e.descriptor.version().map(str::to_string),
            state: e.state,
            last_error: e.last_error.as_ref().map(ToString::to_string),
        })
    }

    // ─── Transitions (driven by the lifecycle manager) ───────────────────────

    /// Moves `id` to `Enabling` and returns the plugin to initialize.
    pub(crate) fn begin_enable(&mut self, id: &str) -> Option<Arc<dyn Plugin>> {
        let entry = self.entries.get_mut(id)?;
        entry.state = PluginState::Enabling;
        Some(entry.descriptor.plugin())
    }

    /// Records a successful `init` of `instance`.
    pub(crate) fn finish_enable(&mut self, id: &str, instance: Arc<dyn Plugin>) {
        self.next_seq += 1;
        if let Some(entry) = self.entries.get_mut(id) {
            entry.state = PluginState::Enabled;
            entry.active = Some(instance);
            entry.last_error = None;
            entry.enabled_seq = self.next_seq;
        }
    }

    /// Records a failed enable attempt.
    pub(crate) fn fail(&mut self, id: &str, error: LifecycleError) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.state = PluginState::Error;
            entry.active = None;
            entry.last_error = Some(error);
        }
    }

    /// Moves `id` to `Disabling` and hands back the running instance.
    pub(crate) fn begin_disable(&mut self, id: &str) -> Option<Arc<dyn Plugin>> {
        let entry = self.entries.get_mut(id)?;
        entry.state = PluginState::Disabling;
        entry.active.take()
    }

    /// Completes a disable; `error` is the teardown failure, if any.
    pub(crate) fn finish_disable(&mut self, id: &str, error: Option<LifecycleError>) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.state = PluginState::Disabled;
            entry.active = None;
            if error.is_some() {
                entry.last_error = error;
            }
        }
    }
}
