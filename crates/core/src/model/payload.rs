//! Encoding of `Assembly::data`.
//!
//! The engine stores each decoded unit as a small JSON object tagged by
//! `kind`. Decoders build `DecodedInstruction`; the disassembler produces the
//! `Undecodable` sentinel itself when a decoder rejects the bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Instruction-set tag carried by every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Arm64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
        }
    }

    /// Lifting-rule family that handles this architecture.
    pub fn family(&self) -> InstructionFamily {
        match self {
            Arch::X86 | Arch::X86_64 => InstructionFamily::X86,
            Arch::Arm | Arch::Arm64 => InstructionFamily::Arm,
        }
    }

    /// Native pointer width in bytes.
    pub fn pointer_size(&self) -> u32 {
        match self {
            Arch::X86 | Arch::Arm => 4,
            Arch::X86_64 | Arch::Arm64 => 8,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = String;

    /// Accepts the usual spellings of architecture hints (`amd64`, `i386`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Ok(Arch::X86_64),
            "x86" | "i386" | "i686" => Ok(Arch::X86),
            "arm" | "armv7" => Ok(Arch::Arm),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            other => Err(format!("unsupported architecture '{other}'")),
        }
    }
}

/// Family of lifting rules an instruction is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionFamily {
    X86,
    Arm,
}

/// A successfully decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInstruction {
    pub arch: Arch,
    pub address: u64,
    pub size: u64,
    /// Raw encoding as lowercase hex.
    pub bytes: String,
    pub mnemonic: String,
    pub operands: String,
}

impl DecodedInstruction {
    pub fn new(
        arch: Arch,
        address: u64,
        raw: &[u8],
        mnemonic: impl Into<String>,
        operands: impl Into<String>,
    ) -> Self {
        Self {
            arch,
            address,
            size: raw.len() as u64,
            bytes: hex_bytes(raw),
            mnemonic: mnemonic.into(),
            operands: operands.into(),
        }
    }

    /// `mnemonic operands`, trimmed.
    pub fn text(&self) -> String {
        format!("{} {}", self.mnemonic, self.operands).trim().to_string()
    }
}

/// Serialized form of `Assembly::data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssemblyPayload {
    Decoded(DecodedInstruction),
    /// Sentinel for bytes the decoder rejected; traversal stops here.
    Undecodable { arch: Arch, address: u64, bytes: String },
}

impl AssemblyPayload {
    pub fn address(&self) -> u64 {
        match self {
            AssemblyPayload::Decoded(insn) => insn.address,
            AssemblyPayload::Undecodable { address, .. } => *address,
        }
    }

    /// Number of bytes this unit occupies in the address space.
    pub fn size(&self) -> u64 {
        match self {
            AssemblyPayload::Decoded(insn) => insn.size,
            AssemblyPayload::Undecodable { .. } => 1,
        }
    }

    pub fn arch(&self) -> Arch {
        match self {
            AssemblyPayload::Decoded(insn) => insn.arch,
            AssemblyPayload::Undecodable { arch, .. } => *arch,
        }
    }

    pub fn is_undecodable(&self) -> bool {
        matches!(self, AssemblyPayload::Undecodable { .. })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

/// Lowercase hex rendering of a byte slice without separators.
pub fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
