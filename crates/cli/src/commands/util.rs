use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use fireball_core::analysis::{DecompileReport, Decompiler, Diagnostic, SharedAddressSpace};
use fireball_core::backends::{load_object_image, BinaryLoader, CapstoneDecoder, MemoryImage, RuleTable};
use fireball_core::model::Arch;

use crate::parse_address;

/// Resolve the DB path (respecting relative/absolute config) and open a ProjectDb (delegates to core helper).
pub fn open_project_db(
    layout: &fireball_core::db::ProjectLayout,
) -> Result<(fireball_core::db::ProjectConfig, std::path::PathBuf, fireball_core::db::ProjectDb)> {
    fireball_core::db::open_project_db(layout)
}

/// Current UTC time as RFC 3339, used for run timestamps.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Load a binary for decompilation.
///
/// With `raw_base` the file is mapped as one flat blob at that address;
/// otherwise it must be an ELF, PE or Mach-O file.
pub fn load_image(path: &Path, raw_base: Option<u64>) -> Result<MemoryImage> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read binary {}", path.display()))?;
    match raw_base {
        Some(base) => Ok(MemoryImage::flat(base, bytes)),
        None => load_object_image(&bytes)
            .with_context(|| format!("Failed to load object file {}", path.display())),
    }
}

/// Pick the architecture: explicit flag, then recorded arch, then the
/// file header, then the project default.
pub fn resolve_arch(
    explicit: Option<&str>,
    recorded: Option<&str>,
    image: &MemoryImage,
    project_default: Option<Arch>,
) -> Result<Arch> {
    if let Some(name) = explicit.or(recorded) {
        return name.parse::<Arch>().map_err(|e| anyhow!("{e}"));
    }
    image
        .arch()
        .or(project_default)
        .ok_or_else(|| anyhow!("Cannot determine architecture; pass --arch"))
}

/// Turn `--entry` values into addresses.
///
/// Each value is an address or a symbol name; with no values the binary's
/// own entry point is used.
pub fn resolve_entries(values: &[String], image: &MemoryImage) -> Result<Vec<u64>> {
    if values.is_empty() {
        return image
            .entry_point()
            .map(|entry| vec![entry])
            .ok_or_else(|| anyhow!("Binary has no entry point; pass --entry"));
    }
    values
        .iter()
        .map(|value| match parse_address(value) {
            Ok(address) => Ok(address),
            Err(_) => image
                .symbol(value)
                .ok_or_else(|| anyhow!("`{value}` is neither an address nor a known symbol")),
        })
        .collect()
}

/// Capstone-backed decompiler over `image` sharing `index`.
pub fn build_decompiler(
    image: MemoryImage,
    arch: Arch,
    index: SharedAddressSpace,
    max_instructions: Option<usize>,
) -> Result<Decompiler> {
    let decoder = CapstoneDecoder::new(arch).context("Failed to initialise decoder")?;
    Ok(Decompiler::new(image, decoder, RuleTable::builtin())
        .with_index(index)
        .max_instructions(max_instructions))
}

pub fn describe_diagnostic(diagnostic: &Diagnostic) -> String {
    match diagnostic {
        Diagnostic::OutOfBounds { address, parent } => {
            format!("0x{address:x}: outside loaded image (reached from 0x{parent:x})")
        }
        Diagnostic::Undecodable { address } => format!("0x{address:x}: undecodable bytes"),
        Diagnostic::Unlifted { assembly_index, reason } => {
            format!("assembly #{assembly_index}: {reason}")
        }
        Diagnostic::BudgetExhausted { limit, pending } => {
            format!("instruction budget of {limit} exhausted with {pending} address(es) pending")
        }
    }
}

/// Print a report as pseudocode followed by a summary, or as JSON.
pub fn print_report(report: &DecompileReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if !report.result.decompiled.is_empty() {
        println!("{}", report.result.decompiled.trim_end());
        println!();
    }
    println!(
        "Assembly: {}, IR: {}, diagnostics: {}",
        report.result.assembly.len(),
        report.result.ir.len(),
        report.diagnostics.len()
    );
    for diagnostic in &report.diagnostics {
        println!("  - {}", describe_diagnostic(diagnostic));
    }
    if report.reused > 0 {
        println!("Reused {} unit(s) decoded by earlier runs", report.reused);
    }
    Ok(())
}
