//! Configuration validation utilities.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, PluginsConfig, SettingsBackendKind, SettingsConfig, TechneConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &TechneConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_plugins_config(&config.plugins)?;
    validate_settings_config(&config.settings)?;
    Ok(())
}

/// Validates logging configuration.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Log filter module name cannot be empty: {module:?}"
        )));
    }

    Ok(())
}

/// Validates the manifest and lifecycle tunables.
fn validate_plugins_config(plugins: &PluginsConfig) -> ConfigResult<()> {
    let mut seen_ids = HashSet::new();

    for entry in &plugins.manifest {
        validate_plugin_id(&entry.id)?;

        if !seen_ids.insert(entry.id.as_str()) {
            return Err(ConfigError::DuplicatePluginId(entry.id.clone()));
        }

        for dep in &entry.dependencies {
            validate_plugin_id(dep)?;
            if dep == &entry.id {
                return Err(ConfigError::SelfDependency(entry.id.clone()));
            }
        }
    }

    if plugins.init_timeout_ms == Some(0) {
        return Err(ConfigError::validation(
            "plugins.init_timeout_ms must be greater than 0 when set",
        ));
    }

    if plugins.max_emit_depth == 0 {
        return Err(ConfigError::validation(
            "plugins.max_emit_depth must be greater than 0",
        ));
    }

    Ok(())
}

/// Validates a plugin id.
fn validate_plugin_id(id: &str) -> ConfigResult<()> {
    if id.is_empty() {
        return Err(ConfigError::missing_field("plugins.manifest.id"));
    }

    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::invalid_id(
            id,
            "must not contain whitespace or control characters",
        ));
    }

    Ok(())
}

/// Validates settings persistence.
fn validate_settings_config(settings: &SettingsConfig) -> ConfigResult<()> {
    if settings.backend == SettingsBackendKind::File && settings.resolved_dir().is_none() {
        return Err(ConfigError::missing_field("settings.dir"));
    }

    if settings
        .namespace
        .as_deref()
        .is_some_and(|ns| ns.trim().is_empty())
    {
        return Err(ConfigError::validation("settings.namespace cannot be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use techne_core::ManifestEntry;

    #[test]
    fn test_validate_empty_config() {
        let config = TechneConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_file_output_without_path() {
        let mut config = TechneConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_duplicate_plugin_id() {
        let mut config = TechneConfig::default();
        config.plugins.manifest = vec![
            ManifestEntry::new("markdown", "a.js"),
            ManifestEntry::new("markdown", "b.js"),
        ];

        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::DuplicatePluginId(id)) if id == "markdown"));
    }

    #[test]
    fn test_validate_dependencies() {
        let mut config = TechneConfig::default();
        config.plugins.manifest = vec![ManifestEntry::new("slides", "s.js").depends_on(["slides"])];
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::SelfDependency(_))
        ));

        config.plugins.manifest = vec![ManifestEntry::new("slides", "s.js").depends_on(["mark down"])];
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidPluginId { .. })
        ));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = TechneConfig::default();
        config.plugins.init_timeout_ms = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_blank_namespace() {
        let mut config = TechneConfig::default();
        config.settings.namespace = Some("  ".into());
        assert!(validate_config(&config).is_err());
    }
}
