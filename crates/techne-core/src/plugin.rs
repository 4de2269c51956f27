//! The plugin contract and its registered descriptor.
//!
//! A plugin is anything implementing [`Plugin`]: an async `init` that
//! receives its [`Host`] and an optional async `destroy`.  A
//! [`PluginDescriptor`] pairs that behaviour with the plugin's identity and
//! descriptive metadata; it is what gets registered.
//!
//! Ordering metadata (dependencies, default enablement) lives in the
//! manifest, not here.
//!
//! # Example
//!
//! ```rust,ignore
//! use techne_core::{FnPlugin, PluginDescriptor};
//!
//! let markdown = PluginDescriptor::new(
//!     "markdown",
//!     FnPlugin::new(|host| async move {
//!         host.log("renderer ready");
//!         Ok(())
//!     })
//!     .on_destroy(|| async { Ok(()) }),
//! )
//! .with_name("Markdown")
//! .with_version("1.2.0");
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::{BoxError, RegistrationError, RegistrationResult};
use crate::host::Host;

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// Lifecycle hooks of a plugin.
///
/// `init` runs once per enable transition with a freshly built [`Host`];
/// re-enabling a disabled plugin calls it again.  `destroy` is best-effort:
/// its failure is reported but never blocks the transition to `disabled`.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Called when the plugin is enabled.
    async fn init(&self, host: Host) -> Result<(), BoxError>;

    /// Called when the plugin is disabled.  The default does nothing.
    async fn destroy(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

type InitFn = Arc<dyn Fn(Host) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type DestroyFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A [`Plugin`] assembled from closures.
#[derive(Clone)]
pub struct FnPlugin {
    init: InitFn,
    destroy: Option<DestroyFn>,
}

impl FnPlugin {
    /// Creates a plugin whose `init` is `init`.
    pub fn new<F, Fut>(init: F) -> Self
    where
        F: Fn(Host) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            init: Arc::new(move |host| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(init(host))
            }),
            destroy: None,
        }
    }

    /// Sets the teardown hook.
    pub fn on_destroy<F, Fut>(mut self, destroy: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.destroy = Some(Arc::new(
            move || -> BoxFuture<'static, Result<(), BoxError>> { Box::pin(destroy()) },
        ));
        self
    }
}

#[async_trait]
impl Plugin for FnPlugin {
    async fn init(&self, host: Host) -> Result<(), BoxError> {
        (self.init)(host).await
    }

    async fn destroy(&self) -> Result<(), BoxError> {
        match &self.destroy {
            Some(f) => f().await,
            None => Ok(()),
        }
    }
}

// ─── PluginDescriptor ─────────────────────────────────────────────────────────

/// Identity, metadata and behaviour of a registered plugin.
///
/// Immutable once registered; registering another descriptor under the same
/// id replaces it as a whole.
#[derive(Clone)]
pub struct PluginDescriptor {
    id: String,
    name: Option<String>,
    version: Option<String>,
    plugin: Arc<dyn Plugin>,
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl PluginDescriptor {
    /// Creates a descriptor for `plugin` under `id`.
    pub fn new(id: impl Into<String>, plugin: impl Plugin) -> Self {
        Self::from_arc(id, Arc::new(plugin))
    }

    /// Creates a descriptor around an already shared plugin.
    pub fn from_arc(id: impl Into<String>, plugin: Arc<dyn Plugin>) -> Self {
        Self {
            id: id.into(),
            name: None,
            version: None,
            plugin,
        }
    }

    /// Shorthand for a plugin that only has an `init` closure.
    pub fn from_fn<F, Fut>(id: impl Into<String>, init: F) -> Self
    where
        F: Fn(Host) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::new(id, FnPlugin::new(init))
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Unique plugin id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name, when set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Version string, when set.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The plugin behaviour.
    pub fn plugin(&self) -> Arc<dyn Plugin> {
        Arc::clone(&self.plugin)
    }

    /// Checks the registration contract: a non-empty id without whitespace
    /// or control characters.
    pub fn validate(&self) -> RegistrationResult<()> {
        if self.id.is_empty() {
            return Err(RegistrationError::MissingId);
        }
        if self.id.chars().any(char::is_whitespace) {
            return Err(RegistrationError::InvalidId {
                id: self.id.clone(),
                reason: "contains whitespace",
            });
        }
        if self.id.chars().any(char::is_control) {
            return Err(RegistrationError::InvalidId {
                id: self.id.clone(),
                reason: "contains control characters",
            });
        }
        Ok(())
    }
}
