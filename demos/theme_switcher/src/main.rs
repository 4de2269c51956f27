//! Theme Switcher Example
//!
//! Two plugins sharing one host:
//!
//! - `theme-manager` owns the active theme.  It restores the last theme from
//!   the durable preference, listens for `theme:set` and announces every
//!   switch with `theme:changed`.
//! - `backdrop` depends on `theme-manager` and repaints whenever the theme
//!   changes.  It only asks for `backdrop`; the resolver pulls the theme
//!   manager in first.
//!
//! ```text
//! start(["backdrop"])
//! └── theme-manager.init   restores "paper", emits theme:changed
//!     └── backdrop.init    subscribes to theme:changed
//! emit theme:set "night"
//! └── theme-manager        persists "night", emits theme:changed
//!     └── backdrop         repaints
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package theme-switcher
//! ```

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use techne::core::events;
use techne::prelude::*;
use tracing::{info, warn};

const THEME_SET: &str = "theme:set";
const THEME_CHANGED: &str = "theme:changed";

// ============================================================================
// theme-manager
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ThemeSettings {
    fallback: String,
}

impl Default for ThemeSettings {
    fn default() -> Self {
        Self {
            fallback: "paper".into(),
        }
    }
}

/// Owns the active theme.
struct ThemeManager {
    subscription: Mutex<Option<Subscription>>,
}

#[async_trait]
impl Plugin for ThemeManager {
    async fn init(&self, host: Host) -> Result<(), BoxError> {
        let preference: Arc<ThemePreference> = host
            .capability("theme-preference")
            .ok_or("theme-preference capability missing")?;

        let settings: ThemeSettings = host.settings_as();
        let current = preference.get().unwrap_or(settings.fallback);
        host.log(format_args!("restored theme '{current}'"));

        let listener_host = host.clone();
        let sub = host.on(THEME_SET, move |payload| {
            let theme = payload.as_str().ok_or("theme:set expects a string")?;
            preference.set(theme)?;
            listener_host.emit(THEME_CHANGED, &json!({ "theme": theme }));
            Ok(())
        });
        *self.subscription.lock() = Some(sub);

        host.emit(THEME_CHANGED, &json!({ "theme": current }));
        Ok(())
    }

    async fn destroy(&self) -> Result<(), BoxError> {
        if let Some(sub) = self.subscription.lock().take() {
            sub.unsubscribe();
        }
        Ok(())
    }
}

// ============================================================================
// backdrop
// ============================================================================

fn backdrop() -> PluginDescriptor {
    let plugin = FnPlugin::new(|host: Host| async move {
        let painter = host.clone();
        host.on(THEME_CHANGED, move |payload| {
            let theme = payload["theme"].as_str().unwrap_or("unknown");
            painter.log(format_args!("repainting backdrop for '{theme}'"));
            painter.set_settings(json!({ "last_painted": theme }));
            Ok(())
        });
        Ok(())
    });

    PluginDescriptor::new("backdrop", plugin)
        .with_name("Backdrop")
        .with_version("0.1.0")
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let manifest = vec![
        ManifestEntry::new("theme-manager", "plugins/theme-manager.js"),
        ManifestEntry::new("backdrop", "plugins/backdrop.js").depends_on(["theme-manager"]),
    ];

    let runtime = TechneRuntime::builder()
        .set("plugins.manifest", manifest)
        .set("plugins.enabled", EnabledSelection::ids(["backdrop"]))
        .build()?;
    let system = runtime.system();

    system.extend_host(
        HostExtensions::new().with("theme-preference", system.theme_preference()),
    );
    system.on(events::PLUGIN_ERROR, |payload| {
        warn!(%payload, "plugin error");
        Ok(())
    });

    runtime.register(
        PluginDescriptor::new(
            "theme-manager",
            ThemeManager {
                subscription: Mutex::new(None),
            },
        )
        .with_name("Theme Manager"),
    )?;
    runtime.register(backdrop())?;

    let report = runtime.start().await;
    info!(status = %report.status(), enabled = ?report.enabled, "Plugins ready");

    system.emit(THEME_SET, &json!("night"));
    system.emit(THEME_SET, &json!("solarized"));

    info!(
        theme = ?system.theme_preference().get(),
        backdrop = ?system.get_plugin_settings("backdrop"),
        "Final state"
    );

    runtime.shutdown().await;
    Ok(())
}
