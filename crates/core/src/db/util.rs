use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::db::{ProjectConfig, ProjectDb, ProjectLayout};

pub fn load_project_config(layout: &ProjectLayout) -> Result<ProjectConfig> {
    let path = &layout.project_config_path;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read project config at {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse project config JSON at {}", path.display()))
}

/// Write `config` as pretty JSON, creating `.fireball/` first.
pub fn save_project_config(layout: &ProjectLayout, config: &ProjectConfig) -> Result<()> {
    std::fs::create_dir_all(&layout.meta_dir)
        .with_context(|| format!("Failed to create {}", layout.meta_dir.display()))?;
    let json = serde_json::to_string_pretty(config).context("Failed to serialize project config")?;
    std::fs::write(&layout.project_config_path, json).with_context(|| {
        format!("Failed to write project config at {}", layout.project_config_path.display())
    })
}

/// Load the config and open the database it points at. A relative
/// `db.path` is resolved against the project root.
pub fn open_project_db(layout: &ProjectLayout) -> Result<(ProjectConfig, PathBuf, ProjectDb)> {
    let config = load_project_config(layout)?;
    let db_path = layout.root.join(Path::new(&config.db.path));
    let db = ProjectDb::open(&db_path)
        .with_context(|| format!("Failed to open project database at {}", db_path.display()))?;
    Ok((config, db_path, db))
}
