use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::db::{open_project_db, BinaryRecord, ProjectConfig, ProjectDb, ProjectLayout};

/// An opened project: layout, parsed config and a live database handle.
#[derive(Debug)]
pub struct ProjectContext {
    pub layout: ProjectLayout,
    pub config: ProjectConfig,
    pub db_path: PathBuf,
    pub db: ProjectDb,
}

impl ProjectContext {
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self> {
        let layout = ProjectLayout::new(root);
        let (config, db_path, db) = open_project_db(&layout)?;
        Ok(Self { layout, config, db_path, db })
    }

    /// The registered binary called `name`.
    pub fn binary(&self, name: &str) -> Result<BinaryRecord> {
        self.db
            .find_binary(name)?
            .ok_or_else(|| anyhow!("Binary `{name}` is not registered; run add-binary first"))
    }

    /// Stored binary paths are relative to the project root unless absolute.
    pub fn binary_path(&self, stored: &str) -> PathBuf {
        self.layout.root.join(stored)
    }
}
