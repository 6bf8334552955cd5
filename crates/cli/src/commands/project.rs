use std::fs;

use anyhow::{anyhow, Context, Result};
use fireball_core::backends::capstone_version;
use fireball_core::db::{save_project_config, ProjectConfig, ProjectDb, ProjectLayout};
use fireball_core::model::Arch;
use serde::Serialize;

use crate::commands::{open_project_db, RunInfo};
use crate::{canonicalize_or_current, infer_project_name};

#[derive(Serialize)]
pub struct ProjectInfoSnapshot {
    pub name: String,
    pub root: String,
    pub config_file: String,
    pub config_version: String,
    pub db_path: String,
    pub default_arch: Option<String>,
    pub max_instructions: Option<usize>,
    pub decoder: String,
    pub layout: ProjectInfoLayout,
    pub binaries: Vec<fireball_core::db::BinaryRecord>,
    pub runs: Vec<RunInfo>,
}

#[derive(Serialize)]
pub struct ProjectInfoLayout {
    pub meta_dir: String,
    pub specs_dir: String,
    pub outputs_dir: String,
}

/// Initialize a new project at `root`.
pub fn init_project_command(root: &str, name: Option<String>, arch: Option<String>) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    if layout.project_config_path.exists() {
        return Err(anyhow!(
            "A project already exists at {}",
            layout.project_config_path.display()
        ));
    }
    if let Some(arch) = arch.as_deref() {
        arch.parse::<Arch>().map_err(|e| anyhow!("{e}"))?;
    }

    let project_name = match name {
        Some(n) => n,
        None => infer_project_name(&root_path),
    };

    fs::create_dir_all(&layout.specs_dir)
        .with_context(|| format!("Failed to create specs dir: {}", layout.specs_dir.display()))?;
    fs::create_dir_all(&layout.outputs_dir).with_context(|| {
        format!("Failed to create outputs dir: {}", layout.outputs_dir.display())
    })?;

    let mut config = ProjectConfig::new(&project_name, layout.db_path_relative_string());
    config.default_arch = arch;
    save_project_config(&layout, &config)?;

    // Create the project database immediately so follow-on commands can rely on it.
    ProjectDb::open(&layout.db_path).with_context(|| {
        format!("Failed to initialize project database at {}", layout.db_path.display())
    })?;

    println!("Initialized fireball project:");
    println!("  Name: {}", project_name);
    println!("  Root: {}", layout.root.display());
    println!("  Config: {}", layout.project_config_path.display());
    println!("  DB path (relative): {}", config.db.path);
    println!("  Specs dir: {}", layout.specs_dir.display());
    println!("  Outputs dir: {}", layout.outputs_dir.display());

    Ok(())
}

/// Show basic information about an existing project.
pub fn project_info_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let (config, db_path, db) = open_project_db(&layout)?;
    let binaries = db.list_binaries().context("Failed to list binaries")?;
    let runs = db.list_runs(None).context("Failed to list decompile runs")?;

    let snapshot = ProjectInfoSnapshot {
        name: config.name.clone(),
        root: layout.root.display().to_string(),
        config_file: layout.project_config_path.display().to_string(),
        config_version: config.config_version.clone(),
        db_path: db_path.display().to_string(),
        default_arch: config.default_arch.clone(),
        max_instructions: config.decompile.max_instructions,
        decoder: format!("capstone {}", capstone_version()),
        layout: ProjectInfoLayout {
            meta_dir: layout.meta_dir.display().to_string(),
            specs_dir: layout.specs_dir.display().to_string(),
            outputs_dir: layout.outputs_dir.display().to_string(),
        },
        binaries,
        runs: runs.iter().map(|run| RunInfo::from_record(&layout, run)).collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Project: {}", snapshot.name);
    println!("  Root: {}", snapshot.root);
    println!("  Config: {}", snapshot.config_file);
    println!("  Config version: {}", snapshot.config_version);
    println!("  DB: {}", snapshot.db_path);
    println!("  Default arch: {}", snapshot.default_arch.as_deref().unwrap_or("(from binary)"));
    match snapshot.max_instructions {
        Some(limit) => println!("  Instruction budget: {limit}"),
        None => println!("  Instruction budget: (unbounded)"),
    }
    println!("  Decoder: {}", snapshot.decoder);
    println!("  Binaries: {}", snapshot.binaries.len());
    for bin in &snapshot.binaries {
        println!("    - {} ({})", bin.name, bin.path);
    }
    println!("  Decompile runs: {}", snapshot.runs.len());

    Ok(())
}
