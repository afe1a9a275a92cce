//! Configuration file loading for mentorbox
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::capability;
use crate::config::{Config, ConfigError};
use crate::types::MAX_RECURSION_DEPTH;

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a file"),
            });
        }
        let config = ConfigBuilder::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if let Some(timeout) = limits.timeout_seconds
            && !(timeout.is_finite() && timeout > 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "limits.timeout_seconds must be a positive number, got {timeout}"
            )));
        }
        if limits.max_output_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "limits.max_output_bytes must be at least 1".into(),
            ));
        }
        if limits.max_recursion_depth == Some(0) {
            return Err(ConfigError::Invalid(
                "limits.max_recursion_depth must be at least 1".into(),
            ));
        }
        if let Some(depth) = limits.max_recursion_depth
            && depth > MAX_RECURSION_DEPTH
        {
            return Err(ConfigError::Invalid(format!(
                "limits.max_recursion_depth must be at most {MAX_RECURSION_DEPTH}, got {depth}"
            )));
        }
        if limits.max_collection_len == Some(0) {
            return Err(ConfigError::Invalid(
                "limits.max_collection_len must be at least 1".into(),
            ));
        }

        for name in &self.allowed_modules {
            if !capability::is_safe_module(name) {
                return Err(ConfigError::Invalid(format!(
                    "allowed_modules: '{name}' is not one of {}",
                    capability::SAFE_MODULES.join(", ")
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config.allowed_modules, vec!["math", "random", "datetime", "json"]);
        assert_eq!(config.limits.timeout_seconds, Some(30.0));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
allowed_modules = ["math", "time"]

[limits]
timeout_seconds = 2.5
max_output_bytes = 4096
max_recursion_depth = 64
max_collection_len = 10000
cancel_grace_ms = 50
"#;

        let config = Config::parse_toml(toml).unwrap();
        assert_eq!(config.allowed_modules, vec!["math", "time"]);
        assert_eq!(config.limits.timeout_seconds, Some(2.5));
        assert_eq!(config.limits.max_output_bytes, Some(4096));
        assert_eq!(config.limits.max_recursion_depth, Some(64));
        assert_eq!(config.limits.max_collection_len, Some(10000));
        assert_eq!(config.limits.cancel_grace_ms, Some(50));
    }

    #[test]
    fn test_partial_limits_dont_override_unspecified_fields() {
        let toml = r#"
[limits]
timeout_seconds = 5
"#;

        let config = Config::parse_toml(toml).unwrap();
        // Only timeout_seconds was specified; other fields stay None so the
        // built-in defaults apply through with_overrides
        assert_eq!(config.limits.timeout_seconds, Some(5.0));
        assert_eq!(config.limits.max_output_bytes, None);
        assert_eq!(
            config.effective_limits(None).max_output_bytes,
            Some(1024 * 1024)
        );
    }

    #[test]
    fn test_default_config_parses() {
        let config = Config::parse_toml(crate::config::EXAMPLE_CONFIG).unwrap();
        assert!(config.allowed_modules.iter().any(|m| m == "json"));
    }

    #[test]
    fn test_invalid_module_rejected() {
        let result = Config::parse_toml(r#"allowed_modules = ["os"]"#);
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("'os'")));
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let result = Config::parse_toml("[limits]\ntimeout_seconds = -1.0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_output_limit_rejected() {
        let result = Config::parse_toml("[limits]\nmax_output_bytes = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_excessive_recursion_limit_rejected() {
        let result = Config::parse_toml("[limits]\nmax_recursion_depth = 50000\n");
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("at most 10000")));

        let config = Config::parse_toml("[limits]\nmax_recursion_depth = 10000\n").unwrap();
        assert_eq!(config.limits.max_recursion_depth, Some(10_000));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/nonexistent/mentorbox.toml");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
