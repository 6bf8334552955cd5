use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fireball_core::analysis::{AddressSpaceIndex, DecompileReport, SharedAddressSpace};
use fireball_core::backends::MemoryImage;
use fireball_core::db::{BinaryRecord, DecompileRunRecord, ProjectContext, ProjectLayout, RunStatus};
use fireball_core::error::{DecompileError, DecompileOutcome};
use fireball_core::model::Arch;
use serde::Serialize;

use crate::commands::{
    build_decompiler, load_image, now_timestamp, print_report, resolve_arch, resolve_entries,
};
use crate::{canonicalize_or_current, parse_address};

/// A registered binary, loaded and ready to decompile.
pub struct ProjectBinary {
    pub record: BinaryRecord,
    pub image: MemoryImage,
    pub arch: Arch,
}

/// Look up `name` in the project and load its image.
pub fn load_project_binary(ctx: &ProjectContext, name: &str) -> Result<ProjectBinary> {
    let record = ctx.binary(name)?;
    let path = ctx.binary_path(&record.path);
    let image = load_image(&path, None)?;
    let arch = resolve_arch(None, record.arch.as_deref(), &image, ctx.config.default_arch())?;
    Ok(ProjectBinary { record, image, arch })
}

/// Store the outcome of one request as a decompile run and return its id.
pub fn record_run(
    ctx: &ProjectContext,
    binary: &str,
    entries: &[u64],
    started_at: &str,
    outcome: &DecompileOutcome<DecompileReport>,
) -> Result<i64> {
    let record = DecompileRunRecord::started(binary, entries.to_vec(), started_at);
    let run_id = ctx.db.insert_decompile_run(&record).context("Failed to record decompile run")?;
    let finished_at = now_timestamp();

    match outcome {
        Ok(report) => {
            ctx.db
                .insert_decompile_result(run_id, &report.result)
                .context("Failed to store decompile result")?;
            ctx.db.finish_decompile_run(
                run_id,
                RunStatus::Succeeded,
                &finished_at,
                &report.diagnostics,
                None,
            )?;
        }
        Err(err) => {
            let status = match err {
                DecompileError::Cancelled => RunStatus::Cancelled,
                _ => RunStatus::Failed,
            };
            let message = err.to_string();
            ctx.db.finish_decompile_run(run_id, status, &finished_at, &[], Some(message.as_str()))?;
        }
    }
    Ok(run_id)
}

/// Write the pseudocode of a run under `outputs/<binary>/`.
pub fn write_run_output(
    layout: &ProjectLayout,
    binary: &str,
    run_id: i64,
    decompiled: &str,
) -> Result<PathBuf> {
    let path = layout.run_output_path(binary, run_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output dir: {}", parent.display()))?;
    }
    fs::write(&path, decompiled)
        .with_context(|| format!("Failed to write decompiled output: {}", path.display()))?;
    Ok(path)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecompileRunOutput<'a> {
    run_id: i64,
    output: String,
    report: &'a DecompileReport,
}

/// Decompile a registered binary, persisting the run and the updated index.
pub fn decompile_command(
    root: &str,
    binary: &str,
    entries: &[String],
    max_instructions: Option<usize>,
    fresh: bool,
    json: bool,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    let target = load_project_binary(&ctx, binary)?;
    let addresses = resolve_entries(entries, &target.image)?;

    let index = if fresh {
        AddressSpaceIndex::new()
    } else {
        ctx.db.load_address_space(binary).context("Failed to load known sections")?
    };
    let shared = SharedAddressSpace::new(index);
    let limit = max_instructions.or(ctx.config.decompile.max_instructions);
    let decompiler = build_decompiler(target.image, target.arch, shared.clone(), limit)?;

    let started_at = now_timestamp();
    let outcome = decompiler.decompile_with_report(&addresses);
    let run_id = record_run(&ctx, binary, &addresses, &started_at, &outcome)?;

    // Every accepted mutation was validated, so the index is consistent even
    // when the request itself failed.
    let snapshot = shared.snapshot()?;
    ctx.db.save_address_space(binary, &snapshot).context("Failed to save known sections")?;

    let report = outcome.with_context(|| format!("Decompile run {run_id} of `{binary}` failed"))?;
    let output = write_run_output(&ctx.layout, binary, run_id, &report.result.decompiled)?;

    if json {
        let wrapped =
            DecompileRunOutput { run_id, output: output.display().to_string(), report: &report };
        println!("{}", serde_json::to_string_pretty(&wrapped)?);
        return Ok(());
    }

    println!("Run {run_id} of {binary} ({})", target.arch);
    println!("Output: {}", output.display());
    println!();
    print_report(&report, false)
}

/// Decompile a file outside any project.
pub fn decompile_file_command(
    path: &str,
    entries: &[String],
    arch: Option<String>,
    base: Option<String>,
    max_instructions: Option<usize>,
    json: bool,
) -> Result<()> {
    let raw_base = base.as_deref().map(parse_address).transpose()?;
    if raw_base.is_some() && arch.is_none() {
        return Err(anyhow!("--base maps a raw blob and requires --arch"));
    }

    let image = load_image(Path::new(path), raw_base)?;
    let arch = resolve_arch(arch.as_deref(), None, &image, None)?;
    let addresses = resolve_entries(entries, &image)?;

    let decompiler = build_decompiler(image, arch, SharedAddressSpace::default(), max_instructions)?;
    let report = decompiler
        .decompile_with_report(&addresses)
        .with_context(|| format!("Failed to decompile {path}"))?;
    print_report(&report, json)
}
