use serde::{Deserialize, Serialize};

use crate::model::Arch;

/// Database location as stored in the project config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path to the project database file (typically relative to project root).
    pub path: String,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Defaults applied to decompile requests that do not override them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompileOptions {
    /// Per-request instruction budget; `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instructions: Option<usize>,
}

/// Serializable configuration describing a fireball project.
///
/// Lives at `.fireball/project.json` in the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Human-friendly project name.
    pub name: String,
    /// Optional description / notes.
    pub description: Option<String>,
    /// Schema/config version. This is about the config format, not binary version.
    pub config_version: String,
    /// Database configuration (path is typically relative to project root).
    pub db: DbConfig,
    /// Architecture assumed for binaries that do not record one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_arch: Option<String>,
    #[serde(default)]
    pub decompile: DecompileOptions,
}

impl ProjectConfig {
    /// Create a new project configuration using the given name and db path.
    pub fn new(name: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config_version: "0.1.0".to_string(),
            db: DbConfig::new(db_path),
            default_arch: None,
            decompile: DecompileOptions::default(),
        }
    }

    /// `default_arch` parsed, ignoring values that are not a known architecture.
    pub fn default_arch(&self) -> Option<Arch> {
        self.default_arch.as_deref().and_then(|a| a.parse().ok())
    }
}
