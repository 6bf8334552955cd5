use anyhow::{anyhow, Context, Result};
use fireball_core::db::{DecompileRunRecord, ProjectLayout};
use fireball_core::model::DecompileResult;
use serde::Serialize;

use crate::canonicalize_or_current;
use crate::commands::{describe_diagnostic, open_project_db};

#[derive(Debug, Serialize, Clone)]
pub struct RunInfo {
    pub id: i64,
    pub binary: String,
    pub entries: Vec<String>,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub diagnostics: usize,
    pub error: Option<String>,
    pub output: String,
}

impl RunInfo {
    pub fn from_record(layout: &ProjectLayout, rec: &DecompileRunRecord) -> Self {
        let id = rec.id.unwrap_or_default();
        RunInfo {
            id,
            binary: rec.binary.clone(),
            entries: rec.entries.iter().map(|e| format!("0x{e:x}")).collect(),
            status: rec.status.as_str().to_string(),
            started_at: rec.started_at.clone(),
            finished_at: rec.finished_at.clone(),
            diagnostics: rec.diagnostics.len(),
            error: rec.error.clone(),
            output: layout.run_output_path(&rec.binary, id).display().to_string(),
        }
    }
}

/// List decompile runs, optionally for one binary.
pub fn list_runs_command(root: &str, binary: Option<String>, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let (_config, _db_path, db) = open_project_db(&layout)?;
    let runs = db.list_runs(binary.as_deref()).context("Failed to list decompile runs")?;
    let infos: Vec<RunInfo> = runs.iter().map(|r| RunInfo::from_record(&layout, r)).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    println!("Decompile runs:");
    if infos.is_empty() {
        println!("(none)");
        return Ok(());
    }
    for run in &infos {
        println!(
            "- #{} {} [{}] entries: {} (started: {}, diagnostics: {})",
            run.id,
            run.binary,
            run.status,
            run.entries.join(", "),
            run.started_at,
            run.diagnostics
        );
        if let Some(err) = &run.error {
            println!("    error: {err}");
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ShowRun<'a> {
    run: &'a DecompileRunRecord,
    result: Option<&'a DecompileResult>,
}

/// Show one run with its stored pseudocode.
pub fn show_run_command(root: &str, id: i64, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let (_config, _db_path, db) = open_project_db(&layout)?;
    let run = db.load_run(id)?.ok_or_else(|| anyhow!("No decompile run with id {id}"))?;
    let result = db.load_run_result(id).context("Failed to load run result")?;

    if json {
        let shown = ShowRun { run: &run, result: result.as_ref() };
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    let info = RunInfo::from_record(&layout, &run);
    println!("Run #{} of {} [{}]", info.id, info.binary, info.status);
    println!("  Entries: {}", info.entries.join(", "));
    println!("  Started: {}", info.started_at);
    println!("  Finished: {}", info.finished_at.as_deref().unwrap_or("(not finished)"));
    if let Some(err) = &info.error {
        println!("  Error: {err}");
    }
    for diagnostic in &run.diagnostics {
        println!("  - {}", describe_diagnostic(diagnostic));
    }
    if let Some(result) = result {
        println!("  Assembly: {}, IR: {}", result.assembly.len(), result.ir.len());
        println!();
        println!("{}", result.decompiled.trim_end());
    }
    Ok(())
}
