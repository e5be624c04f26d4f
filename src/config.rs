//! Configuration management for registry clients
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry.toml)
//! - Environment variables (REGISTRY__*)
//!
//! ## Example config file (registry.toml):
//! ```toml
//! [registry]
//! url = "http://registry:8081"
//! timeout_secs = 10
//!
//! [schemas]
//! root = "./schemas"
//! suffix = "_dev1"
//! compatibility = "FORWARD"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::schema::CompatibilityType;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Registry connection settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Local schema settings for the record-name schema manager
    #[serde(default)]
    pub schemas: SchemasConfig,
}

/// Registry connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the Schema Registry
    #[serde(default = "default_registry_url")]
    pub url: String,

    /// Request timeout, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Local schema configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemasConfig {
    /// Directory searched recursively for `*.json` Avro schemas
    #[serde(default = "default_schema_root")]
    pub root: PathBuf,

    /// Suffix appended to every schema name (and so every subject), e.g.
    /// `_dev1`, to keep test subjects apart from production ones
    #[serde(default)]
    pub suffix: String,

    /// Compatibility applied to every subject on registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<CompatibilityType>,
}

fn default_registry_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_schema_root() -> PathBuf {
    PathBuf::from("schemas")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SchemasConfig {
    fn default() -> Self {
        Self {
            root: default_schema_root(),
            suffix: String::new(),
            compatibility: None,
        }
    }
}

impl RegistrySettings {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, with an optional explicit file on top
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        for location in ["registry.toml", ".registry.toml", "config/registry.toml"] {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(dirs) = directories::ProjectDirs::from("dev", "registry-serde", "registry-serde") {
            let xdg_config = dirs.config_dir().join("registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // REGISTRY__REGISTRY__URL, REGISTRY__SCHEMAS__SUFFIX, ...
        builder = builder.add_source(
            Environment::with_prefix("REGISTRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// The schema root, resolved against the working directory
    pub fn schema_root(&self) -> PathBuf {
        if self.schemas.root.is_absolute() {
            self.schemas.root.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.schemas.root)
        }
    }
}
