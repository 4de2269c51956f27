//! Manifest entries and enable selections supplied by the embedder.
//!
//! The manifest says which plugins exist, where their code lives, whether
//! they are on by default, and which plugins they need first.  The core
//! never fetches `entry`; loading plugin code is the embedder's job.
//!
//! ```json
//! [
//!   { "id": "markdown", "entry": "plugins/markdown.js", "enabledByDefault": true },
//!   { "id": "slides", "entry": "plugins/slides.js", "enabledByDefault": false,
//!     "dependencies": ["markdown"] }
//! ]
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// One manifest record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Plugin id.
    pub id: String,

    /// Resource path of the plugin code; opaque to the core.
    #[serde(default)]
    pub entry: String,

    /// Whether the plugin is enabled when the caller gives no selection.
    #[serde(default)]
    pub enabled_by_default: bool,

    /// Ids that must be initialized before this plugin.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ManifestEntry {
    /// Creates an entry with no dependencies, disabled by default.
    pub fn new(id: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entry: entry.into(),
            enabled_by_default: false,
            dependencies: Vec::new(),
        }
    }

    /// Marks the entry as enabled by default.
    pub fn enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    /// Declares dependencies.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }
}

// ─── EnabledSelection ─────────────────────────────────────────────────────────

/// Per-plugin flag in the map form of [`EnabledSelection`].
///
/// Accepts either `true`/`false` or `{ "enabled": bool }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnabledFlag {
    Bool(bool),
    Object { enabled: bool },
}

impl EnabledFlag {
    pub fn is_enabled(self) -> bool {
        match self {
            Self::Bool(enabled) | Self::Object { enabled } => enabled,
        }
    }
}

/// Which plugins a `start` call should enable.
///
/// ```json
/// ["markdown", "slides"]
/// { "markdown": { "enabled": true }, "backdrop": false }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnabledSelection {
    /// Exactly these ids.
    Ids(Vec<String>),
    /// Per-id flags; ids absent from the map fall back to the manifest's
    /// `enabledByDefault`.
    Map(BTreeMap<String, EnabledFlag>),
}

impl EnabledSelection {
    /// Builds the list form.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Normalizes the selection to a deduplicated list of requested ids.
    ///
    /// `known` is every id in stable order (manifest first, then
    /// registration order); `default_enabled` reports a manifest default.
    /// Requested ids outside `known` are kept, after the known ones, so the
    /// caller can warn about them.
    pub fn requested<F>(&self, known: &[String], default_enabled: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        match self {
            Self::Ids(ids) => {
                for id in ids {
                    if seen.insert(id.as_str()) {
                        out.push(id.clone());
                    }
                }
            }
            Self::Map(map) => {
                for id in known {
                    let enabled = map
                        .get(id)
                        .map_or_else(|| default_enabled(id), |flag| flag.is_enabled());
                    if enabled && seen.insert(id.as_str()) {
                        out.push(id.clone());
                    }
                }
                for (id, flag) in map {
                    if flag.is_enabled() && !known.contains(id) && seen.insert(id.as_str()) {
                        out.push(id.clone());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manifest_entry_wire_format() {
        let entry: ManifestEntry = serde_json::from_value(json!({
            "id": "slides",
            "entry": "plugins/slides.js",
            "enabledByDefault": true,
            "dependencies": ["markdown"]
        }))
        .unwrap();
        assert_eq!(
            entry,
            ManifestEntry::new("slides", "plugins/slides.js")
                .enabled_by_default(true)
                .depends_on(["markdown"])
        );

        let minimal: ManifestEntry = serde_json::from_value(json!({"id": "maze"})).unwrap();
        assert!(!minimal.enabled_by_default);
        assert!(minimal.dependencies.is_empty());
    }

    #[test]
    fn test_selection_accepts_both_forms() {
        let list: EnabledSelection = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(list, EnabledSelection::ids(["a", "b"]));

        let map: EnabledSelection =
            serde_json::from_value(json!({"a": {"enabled": true}, "b": false})).unwrap();
        let EnabledSelection::Map(map) = map else {
            panic!("expected map form");
        };
        assert!(map["a"].is_enabled());
        assert!(!map["b"].is_enabled());
    }

    #[test]
    fn test_map_falls_back_to_defaults() {
        let known: Vec<String> = ["theme", "markdown", "maze"].map(String::from).to_vec();
        let selection: EnabledSelection =
            serde_json::from_value(json!({"maze": true, "theme": false, "ghost": true})).unwrap();

        let requested = selection.requested(&known, |id| id == "markdown" || id == "theme");
        assert_eq!(requested, vec!["markdown", "maze", "ghost"]);
    }

    #[test]
    fn test_ids_are_deduplicated_in_given_order() {
        let selection = EnabledSelection::ids(["b", "a", "b"]);
        assert_eq!(selection.requested(&[], |_| false), vec!["b", "a"]);
    }
}
