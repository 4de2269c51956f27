//! # Techne
//!
//! An embeddable plugin runtime for document and presentation hosts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌────────────────────────────────┐
//! │ TechneRuntime│───▶│ PluginSystem │───▶│ Plugin "markdown"  (own Host)  │──┐
//! │ (config, log)│    │ registry     │───▶│ Plugin "slides"    (own Host)  │──┤
//! └──────────────┘    │ resolver     │    └────────────────────────────────┘  │
//!                     │ lifecycle    │                                        │
//!                     └──────┬───────┘                                        │
//!                            ▼                                                │
//!                ┌───────────────────────┐                                    │
//!                │EventBus  SettingsStore│◀──────────────────────────────────┘
//!                └───────────────────────┘
//! ```
//!
//! - **Runtime**: loads `techne.toml`, sets up logging and settings persistence
//! - **PluginSystem**: registers descriptors and enables them in dependency order
//! - **Host**: the capability surface each plugin receives in `init`
//! - **EventBus**: synchronous, reentrant publish/subscribe shared by all plugins
//! - **SettingsStore**: one persisted JSON value per plugin
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use techne::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = TechneRuntime::new();
//!
//!     runtime.register(PluginDescriptor::from_fn("greeter", |host| async move {
//!         host.on("doc:opened", |payload| {
//!             println!("opened {payload}");
//!             Ok(())
//!         });
//!         Ok(())
//!     }))?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: read `techne.toml` (default)
//! - `yaml-config`: read `techne.yaml`
//! - `json-log`: JSON log output

pub use techne_core as core;
pub use techne_runtime as runtime;

/// Commonly used types for embedding Techne and writing plugins.
///
/// ```rust,ignore
/// use techne::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use techne_runtime::{RuntimeBuilder, TechneConfig, TechneRuntime};

    // Plugin contract
    pub use techne_core::{
        BoxError, FnPlugin, Host, HostExtensions, Plugin, PluginDescriptor, async_trait,
    };

    // Lifecycle
    pub use techne_core::{
        DependencyPolicy, EnabledSelection, ManifestEntry, PluginState, PluginSystem,
        ReadyStatus, StartOptions, StartReport,
    };

    // Events and settings
    pub use techne_core::{EventBus, SettingsBackend, Subscription, ThemePreference, events};

    // Error types
    pub use techne_core::{LifecycleError, RegistrationError};
    pub use techne_runtime::{RuntimeError, RuntimeResult};

    // Logging
    pub use techne_runtime::prelude::*;
}
