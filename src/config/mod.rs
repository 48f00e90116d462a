//! Configuration management

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime configuration of the permissions core
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Name of the shared transient-permissions store to consult
    pub transient_store: String,

    pub read: ReadPathConfig,

    pub scope: ScopeConfig,
}

/// Read-path behavior
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadPathConfig {
    /// Evaluate CHECK clauses when filtering outbound changes
    pub apply_checks: bool,

    /// Project outbound records to the columns the accepting grants expose
    pub apply_column_projection: bool,
}

/// Scope resolution limits
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Upper bound on foreign-key hops when walking to a scope root
    pub max_depth: usize,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            transient_store: "default".to_string(),
            read: ReadPathConfig::default(),
            scope: ScopeConfig::default(),
        }
    }
}

impl Default for ReadPathConfig {
    fn default() -> Self {
        Self {
            apply_checks: true,
            apply_column_projection: true,
        }
    }
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self { max_depth: 32 }
    }
}

impl PermissionsConfig {
    /// Load configuration from the first file found in the search path,
    /// falling back to defaults when none exists.
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        let config: PermissionsConfig =
            serde_norway::from_str(&contents).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Find the configuration file
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("permissions.yaml"),
            PathBuf::from("config/permissions.yaml"),
            dirs::config_dir()
                .map(|p| p.join("fluxsync/permissions.yaml"))
                .unwrap_or_default(),
        ];
        paths.into_iter().find(|path| path.exists())
    }
}
