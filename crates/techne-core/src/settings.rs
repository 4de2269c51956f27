//! Per-plugin settings persisted to a durable key-value medium.
//!
//! The whole `plugin id → value` map is stored as one JSON document under a
//! single namespaced key.  It is read lazily on first access, cached in
//! memory, and flushed synchronously on every write.
//!
//! Persistence never fails loudly:
//!
//! - A corrupt record is treated as an empty map.
//! - An unreadable record reads as empty and is retried on the next access;
//!   writes made meanwhile stay in memory and are flushed once a read
//!   succeeds.
//! - A failed write keeps the new value in memory and publishes
//!   [`SETTINGS_WARNING`](crate::events::SETTINGS_WARNING) on the bus.
//!
//! Settings are not access-controlled between plugins: any holder of the
//! store may read any plugin's slice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::error::{SettingsError, SettingsResult};
use crate::events::SETTINGS_WARNING;

/// Key under which the plugin settings map is stored.
pub const SETTINGS_KEY: &str = "techne-plugin-settings";

/// Key under which the last active theme id is stored.
pub const THEME_KEY: &str = "techne-theme";

// =============================================================================
// SettingsBackend
// =============================================================================

/// A durable string key-value medium.
pub trait SettingsBackend: Send + Sync + 'static {
    /// Reads the record stored under `key`, or `None` when absent.
    fn read(&self, key: &str) -> SettingsResult<Option<String>>;

    /// Replaces the record stored under `key`.
    fn write(&self, key: &str, value: &str) -> SettingsResult<()>;
}

/// In-memory medium.  Clones share the same records, so a second store
/// built on a clone observes everything the first one flushed.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    records: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    /// Creates an empty medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw record under `key`.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.records.lock().get(key).cloned()
    }

    /// Overwrites the raw record under `key`, bypassing any store.
    pub fn set_raw(&self, key: &str, value: impl Into<String>) {
        self.records.lock().insert(key.to_string(), value.into());
    }
}

impl SettingsBackend for MemoryBackend {
    fn read(&self, key: &str) -> SettingsResult<Option<String>> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> SettingsResult<()> {
        self.records.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// File-system medium storing each key as `<dir>/<key>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Creates a backend rooted at `dir`.  The directory is created on the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl SettingsBackend for FileBackend {
    fn read(&self, key: &str) -> SettingsResult<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> SettingsResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// =============================================================================
// SettingsStore
// =============================================================================

struct StoreInner {
    backend: Arc<dyn SettingsBackend>,
    key: String,
    cache: Mutex<Cache>,
    bus: EventBus,
}

/// In-memory view of the settings record.
#[derive(Default)]
struct Cache {
    /// The durable map, once it has been read.
    loaded: Option<Map<String, Value>>,
    /// Writes made while the record could not be read.  Merged over the
    /// durable map and flushed by the first successful read.
    unsynced: Map<String, Value>,
    /// A read failure was already reported and no read has succeeded since.
    read_failing: bool,
}

impl Cache {
    fn view(&self) -> &Map<String, Value> {
        self.loaded.as_ref().unwrap_or(&self.unsynced)
    }
}

/// Cached, persisted map from plugin id to that plugin's settings value.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("key", &self.inner.key)
            .field("loaded", &self.inner.cache.lock().loaded.is_some())
            .finish()
    }
}

impl SettingsStore {
    /// Creates a store over `backend` using [`SETTINGS_KEY`].
    pub fn new(backend: Arc<dyn SettingsBackend>, bus: EventBus) -> Self {
        Self::with_key(backend, bus, SETTINGS_KEY)
    }

    /// Creates a store that keeps its map under a custom key.
    pub fn with_key(backend: Arc<dyn SettingsBackend>, bus: EventBus, key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                key: key.into(),
                cache: Mutex::new(Cache::default()),
                bus,
            }),
        }
    }

    /// Key the settings map is persisted under.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Returns the settings stored for plugin `id`.
    pub fn get_plugin_settings(&self, id: &str) -> Option<Value> {
        let (value, warning) = {
            let mut cache = self.inner.cache.lock();
            let warning = self.load_into(&mut cache);
            (cache.view().get(id).cloned(), warning)
        };
        if let Some(e) = warning {
            self.report(None, &e);
        }
        value
    }

    /// Replaces the settings stored for plugin `id` and flushes the whole
    /// map.  Emits no change event.
    ///
    /// While the durable record cannot be read the value is kept in memory
    /// only, so a partial map never overwrites other plugins' settings.
    pub fn set_plugin_settings(&self, id: &str, value: Value) {
        let (load_warning, write_result) = {
            let mut guard = self.inner.cache.lock();
            let cache = &mut *guard;
            let load_warning = self.load_into(cache);
            let write_result = match cache.loaded.as_mut() {
                Some(map) => {
                    map.insert(id.to_string(), value);
                    self.flush(map)
                }
                None => {
                    cache.unsynced.insert(id.to_string(), value);
                    Err(SettingsError::Unavailable(
                        "stored settings are unreadable, keeping the value in memory".into(),
                    ))
                }
            };
            (load_warning, write_result)
        };

        if let Some(e) = load_warning {
            self.report(None, &e);
        }
        match write_result {
            Ok(()) => debug!(plugin = %id, "Plugin settings persisted"),
            Err(e) => self.report(Some(id), &e),
        }
    }

    /// Snapshot of the whole settings map.
    pub fn all(&self) -> Map<String, Value> {
        let (map, warning) = {
            let mut cache = self.inner.cache.lock();
            let warning = self.load_into(&mut cache);
            (cache.view().clone(), warning)
        };
        if let Some(e) = warning {
            self.report(None, &e);
        }
        map
    }

    fn flush(&self, map: &Map<String, Value>) -> SettingsResult<()> {
        let raw = serde_json::to_string(map)?;
        self.inner.backend.write(&self.inner.key, &raw)
    }

    /// Reads the durable map until one read succeeds.
    ///
    /// Returns a failure worth reporting, if any, so the caller can report
    /// it after releasing the cache lock.  Repeated read failures are only
    /// reported once.
    fn load_into(&self, cache: &mut Cache) -> Option<SettingsError> {
        if cache.loaded.is_some() {
            return None;
        }
        let mut map = match self.inner.backend.read(&self.inner.key) {
            Ok(None) => Map::new(),
            Ok(Some(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    warn!(key = %self.inner.key, "Stored settings are not an object, using empty settings");
                    Map::new()
                }
                Err(e) => {
                    warn!(key = %self.inner.key, error = %e, "Stored settings are corrupt, using empty settings");
                    Map::new()
                }
            },
            Err(e) => {
                if cache.read_failing {
                    return None;
                }
                cache.read_failing = true;
                return Some(e);
            }
        };
        cache.read_failing = false;

        let unsynced = std::mem::take(&mut cache.unsynced);
        let failure = if unsynced.is_empty() {
            None
        } else {
            map.extend(unsynced);
            self.flush(&map).err()
        };
        cache.loaded = Some(map);
        failure
    }

    fn report(&self, id: Option<&str>, error: &SettingsError) {
        warn!(plugin = ?id, key = %self.inner.key, error = %error, "Settings persistence failed");
        let payload = match id {
            Some(id) => json!({ "id": id, "error": error.to_string() }),
            None => json!({ "error": error.to_string() }),
        };
        self.inner.bus.emit(SETTINGS_WARNING, &payload);
    }
}

// =============================================================================
// ThemePreference
// =============================================================================

/// Durable record of the last active top-level theme id.
///
/// Stored as a flat string.  A JSON string or an object with an `id` field
/// is also accepted on read; anything else reads as `None`.
#[derive(Clone)]
pub struct ThemePreference {
    backend: Arc<dyn SettingsBackend>,
    key: String,
}

impl ThemePreference {
    /// Creates a preference record under [`THEME_KEY`].
    pub fn new(backend: Arc<dyn SettingsBackend>) -> Self {
        Self {
            backend,
            key: THEME_KEY.to_string(),
        }
    }

    /// Returns the stored theme id.
    pub fn get(&self) -> Option<String> {
        let raw = match self.backend.read(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read theme preference");
                return None;
            }
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.starts_with('"') || raw.starts_with('{') {
            return match serde_json::from_str::<Value>(raw) {
                Ok(Value::String(id)) if !id.is_empty() => Some(id),
                Ok(Value::Object(obj)) => obj
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string),
                _ => None,
            };
        }
        Some(raw.to_string())
    }

    /// Persists `theme_id` as the active theme.
    pub fn set(&self, theme_id: &str) -> SettingsResult<()> {
        self.backend.write(&self.key, theme_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FailingBackend;

    impl SettingsBackend for FailingBackend {
        fn read(&self, _key: &str) -> SettingsResult<Option<String>> {
            Err(SettingsError::Unavailable("read denied".into()))
        }

        fn write(&self, _key: &str, _value: &str) -> SettingsResult<()> {
            Err(SettingsError::Unavailable("quota exceeded".into()))
        }
    }

    fn store(backend: &MemoryBackend) -> SettingsStore {
        SettingsStore::new(Arc::new(backend.clone()), EventBus::new())
    }

    #[test]
    fn test_settings_survive_fresh_store() {
        let medium = MemoryBackend::new();
        store(&medium).set_plugin_settings("x", json!({"v": 1}));

        let fresh = store(&medium);
        assert_eq!(fresh.get_plugin_settings("x"), Some(json!({"v": 1})));
    }

    #[test]
    fn test_set_replaces_instead_of_merging() {
        let medium = MemoryBackend::new();
        let s = store(&medium);
        s.set_plugin_settings("x", json!({"a": 1, "b": 2}));
        s.set_plugin_settings("x", json!({"c": 3}));
        assert_eq!(s.get_plugin_settings("x"), Some(json!({"c": 3})));
    }

    #[test]
    fn test_whole_map_is_one_record() {
        let medium = MemoryBackend::new();
        let s = store(&medium);
        s.set_plugin_settings("a", json!(1));
        s.set_plugin_settings("b", json!("two"));

        let raw = medium.raw(SETTINGS_KEY).unwrap_or_default();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, json!({"a": 1, "b": "two"}));
    }

    #[test]
    fn test_corrupt_record_reads_as_empty() {
        let medium = MemoryBackend::new();
        medium.set_raw(SETTINGS_KEY, "{not json");
        let s = store(&medium);
        assert_eq!(s.get_plugin_settings("x"), None);

        s.set_plugin_settings("x", json!(true));
        assert_eq!(store(&medium).get_plugin_settings("x"), Some(json!(true)));
    }

    #[test]
    fn test_non_object_record_reads_as_empty() {
        let medium = MemoryBackend::new();
        medium.set_raw(SETTINGS_KEY, "[1, 2, 3]");
        assert!(store(&medium).all().is_empty());
    }

    #[test]
    fn test_backend_failures_become_warnings() {
        let bus = EventBus::new();
        let warnings = Arc::new(AtomicUsize::new(0));
        let warnings_clone = Arc::clone(&warnings);
        bus.on(SETTINGS_WARNING, move |_| {
            warnings_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let s = SettingsStore::new(Arc::new(FailingBackend), bus);
        assert_eq!(s.get_plugin_settings("x"), None);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);

        s.set_plugin_settings("x", json!({"v": 2}));
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
        assert_eq!(s.get_plugin_settings("x"), Some(json!({"v": 2})));
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
    }

    /// Reads fail until `readable` is set.
    struct FlakyBackend {
        medium: MemoryBackend,
        readable: AtomicBool,
    }

    impl SettingsBackend for FlakyBackend {
        fn read(&self, key: &str) -> SettingsResult<Option<String>> {
            if self.readable.load(Ordering::SeqCst) {
                self.medium.read(key)
            } else {
                Err(SettingsError::Unavailable("disk busy".into()))
            }
        }

        fn write(&self, key: &str, value: &str) -> SettingsResult<()> {
            self.medium.write(key, value)
        }
    }

    #[test]
    fn test_unreadable_record_is_not_overwritten() {
        let medium = MemoryBackend::new();
        medium.set_raw(SETTINGS_KEY, r#"{"markdown": {"gfm": true}}"#);
        let backend = Arc::new(FlakyBackend {
            medium: medium.clone(),
            readable: AtomicBool::new(false),
        });
        let s = SettingsStore::new(backend.clone(), EventBus::new());

        s.set_plugin_settings("slides", json!({"loop": false}));
        assert_eq!(s.get_plugin_settings("slides"), Some(json!({"loop": false})));
        let raw: Value = serde_json::from_str(&medium.raw(SETTINGS_KEY).unwrap_or_default()).unwrap();
        assert_eq!(raw, json!({"markdown": {"gfm": true}}));

        backend.readable.store(true, Ordering::SeqCst);
        assert_eq!(s.get_plugin_settings("markdown"), Some(json!({"gfm": true})));
        let raw: Value = serde_json::from_str(&medium.raw(SETTINGS_KEY).unwrap_or_default()).unwrap();
        assert_eq!(
            raw,
            json!({"markdown": {"gfm": true}, "slides": {"loop": false}})
        );
    }

    #[test]
    fn test_listener_may_read_settings_during_warning() {
        let bus = EventBus::new();
        let s = SettingsStore::new(Arc::new(FailingBackend), bus.clone());
        let s_clone = s.clone();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        bus.on(SETTINGS_WARNING, move |_| {
            *seen_clone.lock() = Some(s_clone.get_plugin_settings("x"));
            Ok(())
        });

        s.set_plugin_settings("x", json!(5));
        assert_eq!(*seen.lock(), Some(Some(json!(5))));
    }

    #[test]
    fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested"));
        assert_eq!(backend.read(SETTINGS_KEY).unwrap(), None);

        let s = SettingsStore::new(Arc::new(backend.clone()), EventBus::new());
        s.set_plugin_settings("markdown", json!({"gfm": true}));

        let fresh = SettingsStore::new(Arc::new(FileBackend::new(backend.dir())), EventBus::new());
        assert_eq!(fresh.get_plugin_settings("markdown"), Some(json!({"gfm": true})));
        assert!(dir.path().join("nested").join("techne-plugin-settings.json").exists());
    }

    #[test]
    fn test_theme_preference_formats() {
        let medium = MemoryBackend::new();
        let theme = ThemePreference::new(Arc::new(medium.clone()));
        assert_eq!(theme.get(), None);

        theme.set("solarized").unwrap();
        assert_eq!(theme.get().as_deref(), Some("solarized"));

        medium.set_raw(THEME_KEY, "\"midnight\"");
        assert_eq!(theme.get().as_deref(), Some("midnight"));

        medium.set_raw(THEME_KEY, r#"{"id": "paper"}"#);
        assert_eq!(theme.get().as_deref(), Some("paper"));

        medium.set_raw(THEME_KEY, "{broken");
        assert_eq!(theme.get(), None);

        medium.set_raw(THEME_KEY, "   ");
        assert_eq!(theme.get(), None);
    }
}
