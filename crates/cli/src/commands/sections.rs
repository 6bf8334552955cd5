use anyhow::{Context, Result};
use fireball_core::db::ProjectContext;
use fireball_core::model::KnownSection;

use crate::canonicalize_or_current;

pub fn format_section(section: &KnownSection) -> String {
    match (section.end_address, section.analyzed) {
        (Some(end), true) => {
            format!("0x{:x}..0x{:x} analyzed ({} bytes)", section.start_address, end, end - section.start_address)
        }
        (Some(end), false) => format!("0x{:x}..0x{:x} pending", section.start_address, end),
        (None, _) => format!("0x{:x}.. pending", section.start_address),
    }
}

/// List the known sections recorded for a binary.
pub fn list_sections_command(root: &str, binary: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    ctx.binary(binary)?;
    let sections = ctx.db.list_sections(binary).context("Failed to list known sections")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sections)?);
        return Ok(());
    }

    println!("Known sections for {binary}:");
    if sections.is_empty() {
        println!("(none)");
        return Ok(());
    }
    for section in &sections {
        println!("- {}", format_section(section));
    }
    Ok(())
}
