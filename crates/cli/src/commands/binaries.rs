use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fireball_core::backends::{load_object_image, BinaryLoader};
use fireball_core::db::{BinaryRecord, ProjectLayout};
use fireball_core::model::{Arch, KnownSection};
use serde::Serialize;

use crate::commands::open_project_db;
use crate::{canonicalize_or_current, sha256_file};

/// What the object loader could tell about a file at registration time.
#[derive(Debug)]
struct HeaderInfo {
    arch: Option<Arch>,
    entry: Option<u64>,
    symbols: usize,
}

fn read_header(path: &Path) -> Result<Option<HeaderInfo>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    match load_object_image(&bytes) {
        Ok(image) => Ok(Some(HeaderInfo {
            arch: image.arch(),
            entry: image.entry_point(),
            symbols: image.symbols().count(),
        })),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "not an object file");
            Ok(None)
        }
    }
}

/// `path` relative to `root` when it lives under it, otherwise unchanged.
fn project_relative(root: &Path, path: &Path) -> PathBuf {
    let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    match canonical(path).strip_prefix(canonical(root)) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

/// Register a binary in the project database.
///
/// Object file headers are read so a missing `--arch` is filled from the header;
/// anything else is registered as-is and needs `--arch` (or a project
/// default) plus `--entry` at decompile time.
pub fn add_binary_command(
    root: &str,
    path: &str,
    name: Option<String>,
    arch: Option<String>,
    hash: Option<String>,
    skip_hash: bool,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);
    let (_config, db_path, db) = open_project_db(&layout)?;

    let input_path = Path::new(path);
    let abs_path =
        if input_path.is_absolute() { input_path.to_path_buf() } else { root_path.join(input_path) };
    if !abs_path.is_file() {
        return Err(anyhow!("Binary file does not exist: {}", abs_path.display()));
    }

    let explicit_arch = arch
        .as_deref()
        .map(|a| a.parse::<Arch>().map_err(|e| anyhow!("{e}")))
        .transpose()?;

    let binary_name = match name {
        Some(n) => n,
        None => input_path.file_name().and_then(|os| os.to_str()).unwrap_or(path).to_string(),
    };
    if db.find_binary(&binary_name)?.is_some() {
        return Err(anyhow!("A binary named `{binary_name}` is already registered"));
    }

    let header = read_header(&abs_path)?;
    let detected = header.as_ref().and_then(|p| p.arch);
    if let (Some(given), Some(found)) = (explicit_arch, detected) {
        if given != found {
            tracing::warn!(%given, %found, "--arch overrides the architecture in the file header");
        }
    }

    let hash = match (hash, skip_hash) {
        (Some(h), _) => Some(h),
        (None, true) => None,
        (None, false) => Some(sha256_file(&abs_path)?),
    };

    let record = BinaryRecord {
        name: binary_name,
        path: project_relative(&root_path, &abs_path).to_string_lossy().to_string(),
        arch: explicit_arch.or(detected).map(|a| a.as_str().to_string()),
        hash,
    };
    let id = db.insert_binary(&record).context("Failed to insert binary record")?;

    println!("Added binary:");
    println!("  Id: {}", id);
    println!("  Name: {}", record.name);
    println!("  Path (relative): {}", record.path);
    println!("  Arch: {}", record.arch.as_deref().unwrap_or("(unknown)"));
    match &header {
        Some(p) => {
            let entry = p.entry.map(|e| format!("0x{e:x}")).unwrap_or_else(|| "(none)".into());
            println!("  Entry point: {entry}");
            println!("  Symbols: {}", p.symbols);
        }
        None => println!("  Format: raw (not an ELF, PE or Mach-O file)"),
    }
    println!("  DB: {}", db_path.display());

    Ok(())
}

#[derive(Serialize)]
struct BinaryListing {
    #[serde(flatten)]
    record: BinaryRecord,
    analyzed_sections: usize,
    analyzed_bytes: u64,
}

fn coverage(sections: &[KnownSection]) -> (usize, u64) {
    sections
        .iter()
        .filter(|s| s.analyzed)
        .filter_map(|s| s.end_address.map(|end| end - s.start_address))
        .fold((0, 0), |(count, bytes), len| (count + 1, bytes + len))
}

/// List all binaries registered in the project database with their analysis coverage.
pub fn list_binaries_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);
    let (_config, _db_path, db) = open_project_db(&layout)?;

    let mut listings = Vec::new();
    for record in db.list_binaries().context("Failed to list binaries")? {
        let sections = db
            .list_sections(&record.name)
            .with_context(|| format!("Failed to load sections of {}", record.name))?;
        let (analyzed_sections, analyzed_bytes) = coverage(&sections);
        listings.push(BinaryListing { record, analyzed_sections, analyzed_bytes });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    println!("Binaries:");
    if listings.is_empty() {
        println!("(none)");
        return Ok(());
    }
    for listing in &listings {
        let bin = &listing.record;
        println!(
            "- {} ({}, arch: {}, analyzed: {} sections / {} bytes)",
            bin.name,
            bin.path,
            bin.arch.as_deref().unwrap_or("(unspecified)"),
            listing.analyzed_sections,
            listing.analyzed_bytes
        );
    }

    Ok(())
}
