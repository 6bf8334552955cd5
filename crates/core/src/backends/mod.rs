//! Collaborators the engine calls into.
//!
//! The traversal and lifting logic never touches instruction-set details
//! directly. It goes through three capabilities:
//! - `BinaryLoader`: maps addresses to bytes.
//! - `Decoder`: turns bytes at an address into one instruction plus its
//!   successors.
//! - `LiftingRules`: turns one instruction into IR operations.
//!
//! Built-in implementations live in the submodules; the heavy ones are
//! feature-gated the same way the backends they wrap are optional.

#[cfg(feature = "capstone-decoder")]
pub mod capstone;
pub mod memory;
#[cfg(feature = "object-loader")]
pub mod object;
pub mod rules;

#[cfg(feature = "capstone-decoder")]
pub use capstone::{capstone_version, CapstoneDecoder};
pub use memory::{MemoryImage, Segment};
#[cfg(feature = "object-loader")]
pub use object::load_object_image;
pub use rules::RuleTable;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, LiftError, LoadError};
use crate::model::{Arch, DecodedInstruction, IrOp};

/// Kind of control-flow edge from an instruction to a successor.
///
/// The declaration order is the order successors are queued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Fallthrough,
    Jump,
    ConditionalJump,
    Call,
}

/// Successor edge with target and edge classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Successor {
    pub target: u64,
    pub kind: EdgeKind,
}

impl Successor {
    pub fn new(target: u64, kind: EdgeKind) -> Self {
        Self { target, kind }
    }
}

/// What a decoder reports for one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedUnit {
    pub instruction: DecodedInstruction,
    /// Encoded length in bytes; non-zero and equal to `instruction.size`.
    /// A unit breaking either rule is recorded as undecodable.
    pub length: u64,
    pub successors: Vec<Successor>,
}

/// Provides the bytes of the loaded binary.
pub trait BinaryLoader: Send + Sync {
    /// Return up to `length` bytes starting at `address`.
    ///
    /// Near the end of a region fewer bytes may be returned, but never zero:
    /// an unmapped `address` is `AddressOutOfBounds`.
    fn read_bytes(&self, address: u64, length: usize) -> Result<&[u8], LoadError>;

    /// Architecture recorded in the binary itself, if the format carries one.
    fn arch(&self) -> Option<Arch> {
        None
    }

    /// Default entry point of the binary, if known.
    fn entry_point(&self) -> Option<u64> {
        None
    }
}

/// Decodes a single instruction.
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8], address: u64) -> Result<DecodedUnit, DecodeError>;

    /// Architecture tag stamped on every payload this decoder produces.
    fn arch(&self) -> Arch;

    /// Upper bound on an instruction's encoded length.
    fn max_instruction_len(&self) -> usize {
        16
    }

    fn name(&self) -> &'static str;
}

/// Per-instruction lifting rule table.
pub trait LiftingRules: Send + Sync {
    fn lift(&self, instruction: &DecodedInstruction) -> Result<Vec<IrOp>, LiftError>;
}
