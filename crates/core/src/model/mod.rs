//! Boundary data model shared with hosts of the engine.
//!
//! Field names and optionality are part of the wire contract: every type here
//! serializes with camelCase keys, and `KnownSection::end_address` serializes
//! as `null` when the extent is not yet known.
//!
//! Relationships are integer back-references into flat vectors:
//! - `Assembly::parents_start_address` points at the address of the
//!   instruction that transferred control here (its own address for entries).
//! - `Ir::parents_assembly_index` points at `Assembly::index`.
//!
//! The `data` strings are opaque to hosts; `payload` and `ir` define how the
//! engine itself encodes them.

pub mod ir;
pub mod payload;

use serde::{Deserialize, Serialize};

pub use ir::{parse_immediate, BinaryOperator, Condition, IrOp, Target, UnaryOperator};
pub use payload::{hex_bytes, Arch, AssemblyPayload, DecodedInstruction, InstructionFamily};

/// A contiguous scanned region of the target address space.
///
/// `start_address` is inclusive, `end_address` exclusive. An absent end means
/// the region is still open-ended and therefore cannot be analyzed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownSection {
    pub start_address: u64,
    pub end_address: Option<u64>,
    pub analyzed: bool,
}

impl KnownSection {
    /// A closed, fully analyzed section covering `[start, end)`.
    pub fn analyzed(start: u64, end: u64) -> Self {
        Self { start_address: start, end_address: Some(end), analyzed: true }
    }

    /// An open-ended section that still needs analysis.
    pub fn pending(start: u64) -> Self {
        Self { start_address: start, end_address: None, analyzed: false }
    }

    /// True when `address` lies inside the closed extent of this section.
    ///
    /// Open-ended sections never report containment on their own; their
    /// implicit extent depends on the neighbouring sections.
    pub fn contains(&self, address: u64) -> bool {
        match self.end_address {
            Some(end) => self.start_address <= address && address < end,
            None => false,
        }
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assembly {
    pub index: usize,
    pub parents_start_address: u64,
    pub data: String,
}

/// One lifted intermediate-representation node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ir {
    pub parents_assembly_index: usize,
    pub data: String,
}

/// Final aggregate handed back to the caller of a decompilation request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecompileResult {
    pub assembly: Vec<Assembly>,
    pub ir: Vec<Ir>,
    pub decompiled: String,
}
