//! Techne Runtime - hosting layer for the Techne plugin system.
//!
//! This crate provides:
//! - Layered configuration (`techne.toml`, profiles, `TECHNE_*` variables)
//! - Logging configuration on top of `tracing-subscriber`
//! - Settings persistence selection (in-memory or one JSON file per key)
//! - Runtime orchestration (`TechneRuntime`) with signal-driven shutdown
//!
//! ```ignore
//! use techne_runtime::TechneRuntime;
//! use techne_core::PluginDescriptor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = TechneRuntime::new();
//!
//!     runtime.register(PluginDescriptor::from_fn("hello", |host| async move {
//!         host.log("hello from a plugin");
//!         Ok(())
//!     }))?;
//!
//!     // Enables the configured plugins, waits for Ctrl+C, then disables them
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, Profile, TechneConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, TechneRuntime};

// Re-export tracing for use by plugin crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and `Level`.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
