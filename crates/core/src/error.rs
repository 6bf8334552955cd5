//! Error taxonomy for the decompilation engine.
//!
//! Only `DecompileError` ever reaches the caller of a request. The
//! collaborator errors (`LoadError`, `DecodeError`, `LiftError`) are absorbed
//! by the engine into sentinel nodes and diagnostics, except where noted.

use thiserror::Error;

/// Failure reported by a `BinaryLoader`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The address is not inside any loaded region of the binary.
    #[error("address 0x{address:X} is outside any loaded region")]
    AddressOutOfBounds { address: u64 },
}

/// Failure reported by a `Decoder`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The bytes at `address` do not form a valid instruction.
    #[error("invalid encoding at 0x{address:X}")]
    InvalidEncoding { address: u64 },
}

/// Failure reported by a `LiftingRules` table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiftError {
    /// No rule covers this instruction shape.
    #[error("no lifting rule for `{mnemonic}`")]
    UnliftableInstruction { mnemonic: String },
}

/// A proposed analyzed range disagrees with boundaries already recorded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlapError {
    /// `[start, end)` intersects the recorded unit `[existing_start, existing_end)`.
    #[error(
        "range 0x{start:X}..0x{end:X} overlaps analyzed unit 0x{existing_start:X}..0x{existing_end:X}"
    )]
    Conflict { start: u64, end: u64, existing_start: u64, existing_end: u64 },

    /// The range is empty or inverted.
    #[error("invalid range 0x{start:X}..0x{end:X}")]
    InvalidRange { start: u64, end: u64 },
}

/// Top-level error of a decompilation request.
#[derive(Debug, Error)]
pub enum DecompileError {
    /// Decoding consistency violation; the address model is unreliable.
    #[error(transparent)]
    Overlap(#[from] OverlapError),

    /// The request was cancelled at a work-list boundary.
    #[error("decompilation cancelled")]
    Cancelled,

    /// The finished result broke one of its own index/reference invariants.
    #[error("result invariant violated: {0}")]
    InvariantViolation(String),

    /// Another worker panicked while holding the shared address space.
    #[error("address space index lock poisoned")]
    IndexPoisoned,

    /// A collaborator could not be set up (e.g. decoder init, object parse).
    #[error("backend error: {0}")]
    Backend(String),

    /// A node payload could not be encoded or decoded.
    #[error("payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Convenience result type for engine operations.
pub type DecompileOutcome<T> = Result<T, DecompileError>;
