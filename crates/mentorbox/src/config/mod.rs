use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::language::Language;
use crate::capability::{self, DEFAULT_MODULES};
use crate::types::ResourceLimits;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../mentorbox.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' is not supported")]
    UnsupportedLanguage(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for the mentorbox sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Resource limits applied to every execution.
    /// Unset fields fall back to the built-in defaults; a request's timeout
    /// override takes precedence.
    #[serde(default)]
    pub limits: ResourceLimits,

    /// Modules a submission may import unless the request names its own set.
    /// Always intersected with the safe module list.
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config with built-in limits and default modules, without
    /// going through the embedded file
    pub fn empty() -> Self {
        Self {
            limits: ResourceLimits::default(),
            allowed_modules: default_allowed_modules(),
        }
    }

    /// Merge resource limits with defaults
    pub fn effective_limits(&self, overrides: Option<&ResourceLimits>) -> ResourceLimits {
        let base = ResourceLimits::default().with_overrides(&self.limits);
        match overrides {
            Some(limits) => base.with_overrides(limits),
            None => base,
        }
    }

    /// Modules enabled for a request, in safe-list order
    pub fn effective_modules(&self, requested: Option<&[String]>) -> Vec<&'static str> {
        capability::effective_modules(requested.unwrap_or(&self.allowed_modules))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_allowed_modules() -> Vec<String> {
    DEFAULT_MODULES.iter().map(|name| (*name).to_owned()).collect()
}
