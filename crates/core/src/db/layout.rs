use std::path::{Path, PathBuf};

const META_DIR: &str = ".fireball";

/// Where a project keeps its files, computed from the root alone.
///
/// Nothing here touches the filesystem; `init-project` creates the
/// directories and `save_project_config` writes the metadata.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub root: PathBuf,
    /// `.fireball/`, holding the config and the database.
    pub meta_dir: PathBuf,
    pub project_config_path: PathBuf,
    pub db_path: PathBuf,
    /// Batch decompile specs looked up by `run-spec`.
    pub specs_dir: PathBuf,
    /// Rendered pseudocode, one directory per binary.
    pub outputs_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let meta_dir = root.join(META_DIR);
        Self {
            project_config_path: meta_dir.join("project.json"),
            db_path: meta_dir.join("project.db"),
            specs_dir: root.join("specs"),
            outputs_dir: root.join("outputs"),
            meta_dir,
            root,
        }
    }

    /// The database path as stored in `ProjectConfig`: relative to the root
    /// when it lives under it.
    pub fn db_path_relative_string(&self) -> String {
        let path = self.db_path.strip_prefix(&self.root).unwrap_or(&self.db_path);
        path.to_string_lossy().into_owned()
    }

    /// Output directory of one binary. Path separators in the name are
    /// flattened so every binary stays directly under `outputs/`.
    pub fn binary_output_root(&self, binary_name: &str) -> PathBuf {
        let dir: String = binary_name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        self.outputs_dir.join(dir)
    }

    /// Pseudocode file of a persisted run.
    pub fn run_output_path(&self, binary_name: &str, run_id: i64) -> PathBuf {
        self.binary_output_root(binary_name).join(format!("run-{run_id}.c"))
    }
}
