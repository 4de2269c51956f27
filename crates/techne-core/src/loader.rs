//! Resource-loading seam exposed to plugins through their [`Host`].
//!
//! Fetching scripts and stylesheets belongs to the embedding application;
//! the core only forwards calls to whatever [`ResourceLoader`] it was given.
//!
//! [`Host`]: crate::host::Host

use async_trait::async_trait;
use tracing::debug;

use crate::error::LoadError;

/// Loads script and stylesheet resources on behalf of plugins.
#[async_trait]
pub trait ResourceLoader: Send + Sync + 'static {
    /// Loads and evaluates one script.
    async fn load_script(&self, src: &str) -> Result<(), LoadError>;

    /// Loads one stylesheet.
    async fn load_css(&self, href: &str) -> Result<(), LoadError>;

    /// Loads scripts one after another, stopping at the first failure.
    async fn load_scripts_sequential(&self, srcs: &[String]) -> Result<(), LoadError> {
        for src in srcs {
            self.load_script(src).await?;
        }
        Ok(())
    }
}

/// Loader used when the embedder supplies none; every call fails with
/// [`LoadError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLoader;

#[async_trait]
impl ResourceLoader for UnavailableLoader {
    async fn load_script(&self, src: &str) -> Result<(), LoadError> {
        debug!(src = %src, "No resource loader configured");
        Err(LoadError::Unavailable(src.to_string()))
    }

    async fn load_css(&self, href: &str) -> Result<(), LoadError> {
        debug!(href = %href, "No resource loader configured");
        Err(LoadError::Unavailable(href.to_string()))
    }
}
