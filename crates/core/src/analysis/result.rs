use crate::error::{DecompileError, DecompileOutcome};
use crate::model::{Assembly, DecompileResult, Ir};

/// Compose the final result, re-checking the linking invariants:
/// assembly indices are exactly `0..n`, and every IR node points at an
/// existing assembly index in non-decreasing order.
pub fn assemble(
    assembly: Vec<Assembly>,
    ir: Vec<Ir>,
    decompiled: String,
) -> DecompileOutcome<DecompileResult> {
    if let Some((pos, node)) = assembly.iter().enumerate().find(|(pos, node)| node.index != *pos) {
        return Err(DecompileError::InvariantViolation(format!(
            "assembly at position {pos} has index {}",
            node.index
        )));
    }

    let mut previous = 0usize;
    for (pos, node) in ir.iter().enumerate() {
        if node.parents_assembly_index >= assembly.len() {
            return Err(DecompileError::InvariantViolation(format!(
                "ir {pos} refers to missing assembly {}",
                node.parents_assembly_index
            )));
        }
        if node.parents_assembly_index < previous {
            return Err(DecompileError::InvariantViolation(format!(
                "ir {pos} is out of assembly order ({} after {previous})",
                node.parents_assembly_index
            )));
        }
        previous = node.parents_assembly_index;
    }

    Ok(DecompileResult { assembly, ir, decompiled })
}
