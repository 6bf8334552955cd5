use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fireball_core::analysis::{decompile_batch, SharedAddressSpace};
use fireball_core::backends::MemoryImage;
use fireball_core::db::{ProjectContext, ProjectLayout};
use serde::{Deserialize, Serialize};

use crate::canonicalize_or_current;
use crate::commands::{
    build_decompiler, load_project_binary, now_timestamp, record_run, resolve_entries,
    write_run_output,
};

/// Batch of decompile targets over one registered binary.
///
/// ```yaml
/// binary: server
/// max_instructions: 5000
/// targets:
///   - name: startup
///     entries: [main, 0x401000]
/// ```
#[derive(Debug, Deserialize, Serialize)]
pub struct DecompileSpec {
    pub binary: String,
    pub targets: Vec<SpecTarget>,
    #[serde(default)]
    pub max_instructions: Option<usize>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SpecTarget {
    pub name: String,
    pub entries: Vec<EntryRef>,
}

/// An entry written either as a number or as a string (hex, decimal or symbol).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EntryRef {
    Address(u64),
    Text(String),
}

impl EntryRef {
    fn resolve(&self, image: &MemoryImage) -> Result<u64> {
        match self {
            EntryRef::Address(address) => Ok(*address),
            EntryRef::Text(text) => {
                let resolved = resolve_entries(std::slice::from_ref(text), image)?;
                resolved.first().copied().ok_or_else(|| anyhow!("Empty entry `{text}`"))
            }
        }
    }
}

impl DecompileSpec {
    /// Parse a spec; `.json` files are JSON, everything else YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read spec {}", path.display()))?;
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let spec: DecompileSpec = if is_json {
            serde_json::from_str(&text).context("Failed to parse JSON spec")?
        } else {
            serde_yaml::from_str(&text).context("Failed to parse YAML spec")?
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.binary.trim().is_empty() {
            return Err(anyhow!("Spec 'binary' is required"));
        }
        if self.targets.is_empty() {
            return Err(anyhow!("Spec must include at least one target"));
        }
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(anyhow!("Every target needs a 'name'"));
            }
            if target.entries.is_empty() {
                return Err(anyhow!("Target '{}' has no entries", target.name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct SpecTargetSummary {
    pub target: String,
    pub run_id: i64,
    pub status: String,
    pub assembly: usize,
    pub ir: usize,
    pub diagnostics: usize,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Locate a spec file: as given, relative to the root, or under `specs/`.
pub fn resolve_spec_path(layout: &ProjectLayout, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() || path.exists() {
        return path.to_path_buf();
    }
    let under_root = layout.root.join(path);
    if under_root.exists() {
        return under_root;
    }
    layout.specs_dir.join(path)
}

/// Decompile every target of a spec concurrently over the binary's shared index.
pub fn run_spec_command(root: &str, file: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    let spec = DecompileSpec::load(&resolve_spec_path(&ctx.layout, file))?;

    let binary = load_project_binary(&ctx, &spec.binary)?;
    let mut requests = Vec::with_capacity(spec.targets.len());
    for target in &spec.targets {
        let entries = target
            .entries
            .iter()
            .map(|entry| entry.resolve(&binary.image))
            .collect::<Result<Vec<u64>>>()
            .with_context(|| format!("Invalid entries in target '{}'", target.name))?;
        requests.push(entries);
    }

    let index = ctx.db.load_address_space(&spec.binary).context("Failed to load known sections")?;
    let shared = SharedAddressSpace::new(index);
    let limit = spec.max_instructions.or(ctx.config.decompile.max_instructions);
    let decompiler = build_decompiler(binary.image, binary.arch, shared.clone(), limit)?;

    tracing::info!(binary = %spec.binary, targets = requests.len(), "running decompile spec");
    let started_at = now_timestamp();
    let outcomes = decompile_batch(&decompiler, &requests);

    let mut summaries = Vec::with_capacity(outcomes.len());
    for ((target, entries), outcome) in spec.targets.iter().zip(&requests).zip(&outcomes) {
        let run_id = record_run(&ctx, &spec.binary, entries, &started_at, outcome)?;
        let summary = match outcome {
            Ok(report) => {
                let output =
                    write_run_output(&ctx.layout, &spec.binary, run_id, &report.result.decompiled)?;
                SpecTargetSummary {
                    target: target.name.clone(),
                    run_id,
                    status: "succeeded".into(),
                    assembly: report.result.assembly.len(),
                    ir: report.result.ir.len(),
                    diagnostics: report.diagnostics.len(),
                    output: Some(output.display().to_string()),
                    error: None,
                }
            }
            Err(err) => SpecTargetSummary {
                target: target.name.clone(),
                run_id,
                status: "failed".into(),
                assembly: 0,
                ir: 0,
                diagnostics: 0,
                output: None,
                error: Some(err.to_string()),
            },
        };
        summaries.push(summary);
    }

    let snapshot = shared.snapshot()?;
    ctx.db.save_address_space(&spec.binary, &snapshot).context("Failed to save known sections")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        println!("Spec for {} ({} targets):", spec.binary, summaries.len());
        for s in &summaries {
            match &s.error {
                None => println!(
                    "- {} [run {}]: {} assembly, {} ir, {} diagnostics",
                    s.target, s.run_id, s.assembly, s.ir, s.diagnostics
                ),
                Some(err) => println!("- {} [run {}]: FAILED: {}", s.target, s.run_id, err),
            }
        }
    }

    let failed = summaries.iter().filter(|s| s.error.is_some()).count();
    if failed > 0 {
        return Err(anyhow!("{failed} of {} targets failed", summaries.len()));
    }
    Ok(())
}
