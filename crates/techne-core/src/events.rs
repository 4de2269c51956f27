//! Names of the lifecycle events published on the [`EventBus`].
//!
//! | Event | Payload |
//! |-------|---------|
//! | [`PLUGINS_STARTING`] | manifest snapshot (array of manifest entries) |
//! | [`PLUGINS_STARTED`] | `{ "enabled": [ids] }` |
//! | [`PLUGINS_STOPPED`] | `{ "disabled": [ids] }` |
//! | [`PLUGIN_ENABLING`] | `{ "id" }` |
//! | [`PLUGIN_ENABLED`] | `{ "id" }` |
//! | [`PLUGIN_DISABLED`] | `{ "id", "error"? }` |
//! | [`PLUGIN_ERROR`] | `{ "id", "error", "phase" }` |
//! | [`PLUGIN_WARNING`] | `{ "kind", … }` |
//! | [`PLUGIN_REPLACED`] | `{ "id", "enabled" }` |
//! | [`SETTINGS_WARNING`] | `{ "id"?, "error" }` |
//!
//! [`EventBus`]: crate::bus::EventBus

pub const PLUGINS_STARTING: &str = "plugins:starting";
pub const PLUGINS_STARTED: &str = "plugins:started";
pub const PLUGINS_STOPPED: &str = "plugins:stopped";

pub const PLUGIN_ENABLING: &str = "plugin:enabling";
pub const PLUGIN_ENABLED: &str = "plugin:enabled";
pub const PLUGIN_DISABLED: &str = "plugin:disabled";
pub const PLUGIN_ERROR: &str = "plugin:error";
pub const PLUGIN_WARNING: &str = "plugin:warning";
pub const PLUGIN_REPLACED: &str = "plugin:replaced";

pub const SETTINGS_WARNING: &str = "settings:warning";
