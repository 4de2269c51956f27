//! End-to-end behaviour of `PluginSystem`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use techne_core::events::{
    PLUGIN_DISABLED, PLUGIN_ENABLED, PLUGIN_ENABLING, PLUGIN_ERROR, PLUGIN_REPLACED,
    PLUGIN_WARNING, PLUGINS_STARTED, PLUGINS_STARTING, PLUGINS_STOPPED,
};
use techne_core::{
    BoxError, DependencyPolicy, EnabledSelection, FnPlugin, HostExtensions, LifecycleError,
    ManifestEntry, MemoryBackend, PluginDescriptor, PluginState, PluginSystem, ReadyStatus,
    SettingsStore, StartOptions, EventBus,
};

type Journal = Arc<Mutex<Vec<String>>>;

/// A plugin that records `init:<id>` / `destroy:<id>` and can be told to fail.
fn recorded(id: &str, journal: &Journal, fail_init: bool, fail_destroy: bool) -> PluginDescriptor {
    let init_journal = Arc::clone(journal);
    let destroy_journal = Arc::clone(journal);
    let init_id = id.to_string();
    let destroy_id = id.to_string();

    PluginDescriptor::new(
        id,
        FnPlugin::new(move |_host| {
            let journal = Arc::clone(&init_journal);
            let id = init_id.clone();
            async move {
                journal.lock().push(format!("init:{id}"));
                if fail_init {
                    return Err::<(), BoxError>(format!("{id} refused to start").into());
                }
                Ok(())
            }
        })
        .on_destroy(move || {
            let journal = Arc::clone(&destroy_journal);
            let id = destroy_id.clone();
            async move {
                journal.lock().push(format!("destroy:{id}"));
                if fail_destroy {
                    return Err::<(), BoxError>("teardown exploded".into());
                }
                Ok(())
            }
        }),
    )
}

fn ok(id: &str, journal: &Journal) -> PluginDescriptor {
    recorded(id, journal, false, false)
}

fn capture(system: &PluginSystem, event: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    system.on(event, move |payload| {
        sink.lock().push(payload.clone());
        Ok(())
    });
    seen
}

fn manifest(entries: &[(&str, &[&str])]) -> Vec<ManifestEntry> {
    entries
        .iter()
        .map(|(id, deps)| ManifestEntry::new(*id, format!("plugins/{id}.js")).depends_on(deps.iter().copied()))
        .collect()
}

// ─── Registration ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_then_get_returns_same_id() {
    let system = PluginSystem::new();
    let journal = Journal::default();
    for id in ["theme-manager", "markdown", "maze"] {
        system.register(ok(id, &journal)).unwrap();
        assert_eq!(system.get_plugin(id).unwrap().id(), id);
    }
    assert_eq!(system.list_plugins(), vec!["theme-manager", "markdown", "maze"]);
    assert_eq!(system.plugin_state("markdown"), PluginState::Registered);
}

#[tokio::test]
async fn test_reregistering_enabled_plugin_takes_effect_after_cycle() {
    let system = PluginSystem::new();
    let journal = Journal::default();
    let replaced = capture(&system, PLUGIN_REPLACED);

    system.register(ok("theme", &journal)).unwrap();
    system.enable_plugin("theme").await.unwrap();

    let second = Journal::default();
    system.register(ok("theme", &second)).unwrap();
    assert!(system.is_enabled("theme"));
    assert_eq!(*replaced.lock(), vec![json!({"id": "theme", "enabled": true})]);

    system.disable_plugin("theme").await.unwrap();
    assert_eq!(*journal.lock(), vec!["init:theme", "destroy:theme"]);

    system.enable_plugin("theme").await.unwrap();
    assert_eq!(*second.lock(), vec!["init:theme"]);
}

// ─── Ordering ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dependency_initializes_before_dependent_regardless_of_request_order() {
    let system = PluginSystem::builder()
        .manifest(manifest(&[("p1", &[]), ("p2", &["p1"])]))
        .build();
    let journal = Journal::default();
    system.register(ok("p2", &journal)).unwrap();
    system.register(ok("p1", &journal)).unwrap();

    let report = system.start(StartOptions::ids(["p2", "p1"])).await;

    assert_eq!(*journal.lock(), vec!["init:p1", "init:p2"]);
    assert_eq!(report.enabled, vec!["p1", "p2"]);
    assert_eq!(report.status(), ReadyStatus::Ready);
}

#[tokio::test]
async fn test_unrequested_dependency_is_pulled_in() {
    let system = PluginSystem::builder()
        .manifest(manifest(&[("markdown", &[]), ("slides", &["markdown"])]))
        .build();
    let journal = Journal::default();
    system.register(ok("markdown", &journal)).unwrap();
    system.register(ok("slides", &journal)).unwrap();

    system.start(StartOptions::ids(["slides"])).await;
    assert_eq!(system.get_enabled(), vec!["markdown", "slides"]);
}

#[tokio::test]
async fn test_cycle_terminates_and_enables_both_once() {
    let system = PluginSystem::builder()
        .manifest(manifest(&[("a", &["b"]), ("b", &["a"])]))
        .build();
    let journal = Journal::default();
    let warnings = capture(&system, PLUGIN_WARNING);
    system.register(ok("a", &journal)).unwrap();
    system.register(ok("b", &journal)).unwrap();

    let report = system.start(StartOptions::ids(["a", "b"])).await;

    let inits = journal.lock().clone();
    assert_eq!(inits.len(), 2);
    assert!(inits.contains(&"init:a".to_string()));
    assert!(inits.contains(&"init:b".to_string()));
    assert_eq!(report.enabled.len(), 2);
    assert_eq!(report.status(), ReadyStatus::Partial);

    let warnings = warnings.lock();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["kind"], "cycle");
}

// ─── Failure isolation ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failing_init_does_not_block_the_batch() {
    let system = PluginSystem::new();
    let journal = Journal::default();
    let errors = capture(&system, PLUGIN_ERROR);
    let started = capture(&system, PLUGINS_STARTED);
    system.register(recorded("a", &journal, true, false)).unwrap();
    system.register(ok("b", &journal)).unwrap();

    let report = system.start(StartOptions::ids(["a", "b"])).await;

    assert_eq!(system.plugin_state("a"), PluginState::Error);
    assert_eq!(system.plugin_state("b"), PluginState::Enabled);
    assert_eq!(*journal.lock(), vec!["init:a", "init:b"]);
    assert_eq!(report.status(), ReadyStatus::ReadyWithErrors);
    assert!(matches!(&report.failed[..], [LifecycleError::InitFailed { id, .. }] if id == "a"));

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["id"], "a");
    assert_eq!(errors[0]["phase"], "init");
    assert_eq!(*started.lock(), vec![json!({"enabled": ["b"]})]);
}

#[tokio::test]
async fn test_errored_plugin_can_be_retried() {
    let system = PluginSystem::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    system
        .register(PluginDescriptor::from_fn("flaky", move |_host| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err::<(), BoxError>("first attempt fails".into());
                }
                Ok(())
            }
        }))
        .unwrap();

    assert_eq!(system.enable_plugin("flaky").await.unwrap(), PluginState::Error);
    assert!(system.last_error("flaky").is_some());
    assert_eq!(system.enable_plugin("flaky").await.unwrap(), PluginState::Enabled);
    assert!(system.last_error("flaky").is_none());
}

#[tokio::test]
async fn test_failing_destroy_still_disables() {
    let system = PluginSystem::new();
    let journal = Journal::default();
    let disabled = capture(&system, PLUGIN_DISABLED);
    let errors = capture(&system, PLUGIN_ERROR);
    system.register(recorded("backdrop", &journal, false, true)).unwrap();
    system.enable_plugin("backdrop").await.unwrap();

    let state = system.disable_plugin("backdrop").await.unwrap();

    assert_eq!(state, PluginState::Disabled);
    assert!(!system.is_enabled("backdrop"));
    assert_eq!(errors.lock()[0]["phase"], "destroy");
    let disabled = disabled.lock();
    assert_eq!(disabled[0]["id"], "backdrop");
    assert!(disabled[0]["error"].as_str().unwrap().contains("teardown exploded"));
}

#[tokio::test]
async fn test_double_enable_invokes_init_once() {
    let system = PluginSystem::new();
    let journal = Journal::default();
    system.register(ok("maze", &journal)).unwrap();

    assert_eq!(system.enable_plugin("maze").await.unwrap(), PluginState::Enabled);
    assert_eq!(system.enable_plugin("maze").await.unwrap(), PluginState::Enabled);
    assert_eq!(*journal.lock(), vec!["init:maze"]);
}

#[tokio::test]
async fn test_enable_plugin_enables_dependencies_first() {
    let system = PluginSystem::builder()
        .manifest(manifest(&[("base", &[]), ("mid", &["base"]), ("top", &["mid"])]))
        .build();
    let journal = Journal::default();
    for id in ["top", "mid", "base"] {
        system.register(ok(id, &journal)).unwrap();
    }

    system.enable_plugin("top").await.unwrap();
    assert_eq!(*journal.lock(), vec!["init:base", "init:mid", "init:top"]);
}

// ─── Lifecycle events ─────────────────────────────────────────────────────────

/// Records `<tag>:<id>` into `journal` for every emit of `event`.
fn trace_event(system: &PluginSystem, event: &str, tag: &'static str, journal: &Journal) {
    let journal = Arc::clone(journal);
    system.on(event, move |payload| {
        let id = payload["id"].as_str().unwrap_or("?");
        journal.lock().push(format!("{tag}:{id}"));
        Ok(())
    });
}

#[tokio::test]
async fn test_enable_events_bracket_init_and_stop_reports_reverse_order() {
    let system = PluginSystem::builder()
        .manifest(manifest(&[("markdown", &[]), ("slides", &["markdown"])]))
        .build();
    let journal = Journal::default();
    system.register(ok("markdown", &journal)).unwrap();
    system.register(ok("slides", &journal)).unwrap();
    trace_event(&system, PLUGIN_ENABLING, "enabling", &journal);
    trace_event(&system, PLUGIN_ENABLED, "enabled", &journal);
    let enabled = capture(&system, PLUGIN_ENABLED);
    let stopped = capture(&system, PLUGINS_STOPPED);

    system.start(StartOptions::ids(["slides"])).await;

    assert_eq!(
        *journal.lock(),
        vec![
            "enabling:markdown",
            "init:markdown",
            "enabled:markdown",
            "enabling:slides",
            "init:slides",
            "enabled:slides",
        ]
    );
    assert_eq!(
        *enabled.lock(),
        vec![json!({"id": "markdown"}), json!({"id": "slides"})]
    );

    journal.lock().clear();
    let disabled = system.stop().await;

    assert_eq!(disabled, vec!["slides", "markdown"]);
    assert_eq!(*journal.lock(), vec!["destroy:slides", "destroy:markdown"]);
    assert_eq!(
        *stopped.lock(),
        vec![json!({"disabled": ["slides", "markdown"]})]
    );
    assert!(system.get_enabled().is_empty());
}

// ─── Dependency policy ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_lenient_policy_proceeds_past_failed_dependency() {
    let system = PluginSystem::builder()
        .manifest(manifest(&[("markdown", &[]), ("slides", &["markdown"])]))
        .build();
    let journal = Journal::default();
    let warnings = capture(&system, PLUGIN_WARNING);
    system.register(recorded("markdown", &journal, true, false)).unwrap();
    system.register(ok("slides", &journal)).unwrap();

    system.start(StartOptions::ids(["slides"])).await;

    assert_eq!(system.plugin_state("markdown"), PluginState::Error);
    assert_eq!(system.plugin_state("slides"), PluginState::Enabled);
    assert_eq!(
        *warnings.lock(),
        vec![json!({"kind": "dependency", "plugin": "slides", "dependency": "markdown"})]
    );
}

#[tokio::test]
async fn test_strict_policy_fails_dependent_without_calling_init() {
    let system = PluginSystem::builder()
        .manifest(manifest(&[("markdown", &[]), ("slides", &["markdown"]), ("maze", &["ghost"])]))
        .dependency_policy(DependencyPolicy::Strict)
        .build();
    let journal = Journal::default();
    system.register(recorded("markdown", &journal, true, false)).unwrap();
    system.register(ok("slides", &journal)).unwrap();
    system.register(ok("maze", &journal)).unwrap();

    let report = system.start(StartOptions::ids(["slides", "maze"])).await;

    assert_eq!(*journal.lock(), vec!["init:markdown"]);
    assert_eq!(system.plugin_state("slides"), PluginState::Error);
    assert_eq!(system.plugin_state("maze"), PluginState::Error);
    assert!(matches!(
        system.last_error("maze"),
        Some(LifecycleError::DependencyUnavailable { dependency, .. }) if dependency == "ghost"
    ));
    assert_eq!(report.failed.len(), 3);
}

#[tokio::test]
async fn test_unknown_and_unregistered_ids_are_skipped() {
    let system = PluginSystem::builder()
        .manifest(manifest(&[("theme", &[]), ("later", &[])]))
        .build();
    let journal = Journal::default();
    system.register(ok("theme", &journal)).unwrap();

    let report = system.start(StartOptions::ids(["theme", "later", "nope"])).await;

    assert_eq!(report.enabled, vec!["theme"]);
    assert_eq!(report.skipped, vec!["later", "nope"]);
    assert_eq!(report.status(), ReadyStatus::Partial);
}

#[tokio::test]
async fn test_map_selection_falls_back_to_manifest_defaults() {
    let system = PluginSystem::builder()
        .manifest(vec![
            ManifestEntry::new("theme", "theme.js").enabled_by_default(true),
            ManifestEntry::new("markdown", "markdown.js").enabled_by_default(true),
            ManifestEntry::new("maze", "maze.js"),
        ])
        .build();
    let journal = Journal::default();
    for id in ["theme", "markdown", "maze"] {
        system.register(ok(id, &journal)).unwrap();
    }
    let starting = capture(&system, PLUGINS_STARTING);

    let selection: EnabledSelection =
        serde_json::from_value(json!({"markdown": {"enabled": false}, "maze": {"enabled": true}}))
            .unwrap();
    system.start(selection.into()).await;

    assert_eq!(system.get_enabled(), vec!["theme", "maze"]);
    assert_eq!(starting.lock()[0].as_array().unwrap().len(), 3);
}

// ─── Timeout ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_slow_init_times_out_when_configured() {
    let system = PluginSystem::builder()
        .init_timeout(Some(Duration::from_millis(20)))
        .build();
    let journal = Journal::default();
    system
        .register(PluginDescriptor::from_fn("sloth", |_host| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }))
        .unwrap();
    system.register(ok("quick", &journal)).unwrap();

    let report = system.start(StartOptions::ids(["sloth", "quick"])).await;

    assert!(matches!(
        system.last_error("sloth"),
        Some(LifecycleError::InitTimedOut { millis: 20, .. })
    ));
    assert_eq!(report.enabled, vec!["quick"]);
}

// ─── Host ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_extend_host_is_not_retroactive() {
    let system = PluginSystem::new();
    let seen: Arc<Mutex<Vec<(String, Vec<String>)>>> = Arc::default();

    for id in ["early", "late"] {
        let seen = Arc::clone(&seen);
        system
            .register(PluginDescriptor::from_fn(id, move |host| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock()
                        .push((host.plugin_id().to_string(), host.capability_keys()));
                    Ok(())
                }
            }))
            .unwrap();
    }

    system.extend_host(HostExtensions::new().with("theme", "dark".to_string()));
    system.enable_plugin("early").await.unwrap();
    system.extend_host(HostExtensions::new().with("markdown", 1_u8));
    system.enable_plugin("late").await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen[0], ("early".to_string(), vec!["theme".to_string()]));
    assert_eq!(
        seen[1],
        ("late".to_string(), vec!["markdown".to_string(), "theme".to_string()])
    );
}

#[tokio::test]
async fn test_plugins_talk_over_the_bus_and_keep_settings() {
    let backend = Arc::new(MemoryBackend::new());
    let system = PluginSystem::builder()
        .manifest(manifest(&[("theme", &[]), ("backdrop", &["theme"])]))
        .backend(backend.clone())
        .build();
    let received = Arc::new(Mutex::new(Vec::new()));

    system
        .register(PluginDescriptor::from_fn("theme", |host| async move {
            host.set_settings(json!({"active": "dark"}));
            Ok(())
        }))
        .unwrap();

    let sink = Arc::clone(&received);
    system
        .register(PluginDescriptor::from_fn("backdrop", move |host| {
            let sink = Arc::clone(&sink);
            async move {
                host.on("theme:changed", move |payload| {
                    sink.lock().push(payload.clone());
                    Ok(())
                });
                Ok(())
            }
        }))
        .unwrap();

    system.start(StartOptions::ids(["backdrop"])).await;
    system.emit("theme:changed", &json!({"id": "light"}));

    assert_eq!(*received.lock(), vec![json!({"id": "light"})]);
    assert_eq!(system.get_plugin_settings("theme"), Some(json!({"active": "dark"})));

    let fresh = SettingsStore::new(backend, EventBus::new());
    assert_eq!(fresh.get_plugin_settings("theme"), Some(json!({"active": "dark"})));
}

#[tokio::test]
async fn test_independent_systems_do_not_share_state() {
    let one = PluginSystem::new();
    let two = PluginSystem::new();
    let journal = Journal::default();
    one.register(ok("theme", &journal)).unwrap();

    assert!(two.get_plugin("theme").is_none());
    one.set_plugin_settings("theme", json!(1));
    assert_eq!(two.get_plugin_settings("theme"), None);
}
