//! Mnemonic-keyed lifting rules.
//!
//! A `RuleTable` holds one `FamilyRules` per instruction family and picks the
//! family from the architecture tag stamped on each decoded instruction.

pub mod arm;
pub mod x86;

use std::collections::HashMap;

pub use arm::ArmRules;
pub use x86::X86Rules;

use crate::backends::LiftingRules;
use crate::error::LiftError;
use crate::model::{DecodedInstruction, InstructionFamily, IrOp};

/// Lifting rules for a single instruction family.
pub trait FamilyRules: Send + Sync {
    fn family(&self) -> InstructionFamily;
    fn lift(&self, instruction: &DecodedInstruction) -> Result<Vec<IrOp>, LiftError>;
}

/// Registry of family rules; dispatches on `Arch::family()`.
#[derive(Default)]
pub struct RuleTable {
    families: HashMap<InstructionFamily, Box<dyn FamilyRules>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self { families: HashMap::new() }
    }

    /// Table with the x86 and ARM families registered.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        table.register(X86Rules).register(ArmRules);
        table
    }

    pub fn register<R: FamilyRules + 'static>(&mut self, rules: R) -> &mut Self {
        self.families.insert(rules.family(), Box::new(rules));
        self
    }

    pub fn supports(&self, family: InstructionFamily) -> bool {
        self.families.contains_key(&family)
    }
}

impl LiftingRules for RuleTable {
    fn lift(&self, instruction: &DecodedInstruction) -> Result<Vec<IrOp>, LiftError> {
        match self.families.get(&instruction.arch.family()) {
            Some(rules) => rules.lift(instruction),
            None => Err(LiftError::UnliftableInstruction { mnemonic: instruction.mnemonic.clone() }),
        }
    }
}

/// Split an operand string on top-level commas, leaving commas inside
/// `[...]` and `{...}` alone.
pub(crate) fn split_operands(operands: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in operands.chars() {
        match c {
            '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// C type for an access of `size` bytes.
pub(crate) fn c_type(size: u32, signed: bool) -> &'static str {
    match (size, signed) {
        (1, false) => "uint8_t",
        (2, false) => "uint16_t",
        (4, false) => "uint32_t",
        (16, _) => "uint128_t",
        (1, true) => "int8_t",
        (2, true) => "int16_t",
        (4, true) => "int32_t",
        (_, true) => "int64_t",
        _ => "uint64_t",
    }
}

pub(crate) fn unliftable(instruction: &DecodedInstruction) -> LiftError {
    LiftError::UnliftableInstruction { mnemonic: instruction.mnemonic.clone() }
}
