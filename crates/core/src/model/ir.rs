//! Encoding of `Ir::data`.
//!
//! Operands are kept as C-like expression strings produced by the lifting
//! rules (`rax`, `*(uint64_t *)(rbp - 0x8)`, `0x10`); the renderer only needs
//! to arrange them into statements.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Rem => "%",
            BinaryOperator::And => "&",
            BinaryOperator::Or => "|",
            BinaryOperator::Xor => "^",
            BinaryOperator::Shl => "<<",
            BinaryOperator::Shr => ">>",
            // Arithmetic shift; the signedness is lost in plain C text.
            BinaryOperator::Sar => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Neg,
    Not,
}

impl UnaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOperator::Neg => "-",
            UnaryOperator::Not => "~",
        }
    }
}

/// Branch condition, evaluated against the most recent `Compare` unless it
/// names its own operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Below,
    BelowEq,
    Above,
    AboveEq,
    Sign,
    NotSign,
    Overflow,
    NotOverflow,
    Parity,
    NotParity,
    Zero { operand: String },
    NonZero { operand: String },
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Eq => f.write_str("flags.eq"),
            Condition::Ne => f.write_str("!flags.eq"),
            Condition::Lt => f.write_str("flags.lt"),
            Condition::Le => f.write_str("flags.lt || flags.eq"),
            Condition::Gt => f.write_str("!(flags.lt || flags.eq)"),
            Condition::Ge => f.write_str("!flags.lt"),
            Condition::Below => f.write_str("flags.below"),
            Condition::BelowEq => f.write_str("flags.below || flags.eq"),
            Condition::Above => f.write_str("!(flags.below || flags.eq)"),
            Condition::AboveEq => f.write_str("!flags.below"),
            Condition::Sign => f.write_str("flags.sign"),
            Condition::NotSign => f.write_str("!flags.sign"),
            Condition::Overflow => f.write_str("flags.overflow"),
            Condition::NotOverflow => f.write_str("!flags.overflow"),
            Condition::Parity => f.write_str("flags.parity"),
            Condition::NotParity => f.write_str("!flags.parity"),
            Condition::Zero { operand } => write!(f, "{operand} == 0"),
            Condition::NonZero { operand } => write!(f, "{operand} != 0"),
        }
    }
}

/// Control-transfer destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Direct(u64),
    Indirect(String),
}

impl Target {
    /// Parse an operand: plain `0x..`/decimal immediates are direct targets,
    /// anything else is an indirect expression.
    pub fn from_operand(operand: &str) -> Self {
        let trimmed = operand.trim().trim_start_matches('#');
        parse_immediate(trimmed)
            .map(Target::Direct)
            .unwrap_or_else(|| Target::Indirect(trimmed.to_string()))
    }

    pub fn direct(&self) -> Option<u64> {
        match self {
            Target::Direct(address) => Some(*address),
            Target::Indirect(_) => None,
        }
    }
}

/// One lifted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IrOp {
    Assign { dst: String, src: String },
    Binary { dst: String, lhs: String, operator: BinaryOperator, rhs: String },
    Unary { dst: String, operator: UnaryOperator, src: String },
    /// Sets the condition flags from `lhs - rhs` (or `lhs & rhs` when `test`).
    Compare { lhs: String, rhs: String, test: bool },
    Push { value: String },
    Pop { dst: String },
    Jump { target: Target },
    CondJump { condition: Condition, target: Target },
    Call { target: Target },
    Return,
    Nop,
    /// Side effect with no direct C equivalent (syscall, breakpoint, halt).
    Intrinsic { name: String, args: Vec<String> },
    /// Sentinel for an instruction no rule could lift; carries the raw
    /// assembly payload verbatim.
    Unlifted { raw: String },
}

impl IrOp {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Ops after which control never falls through.
    pub fn ends_flow(&self) -> bool {
        matches!(self, IrOp::Jump { .. } | IrOp::Return)
            || matches!(self, IrOp::Intrinsic { name, .. } if name == "halt" || name == "trap")
    }

    /// Direct intra-procedural branch destination, if any.
    pub fn branch_target(&self) -> Option<u64> {
        match self {
            IrOp::Jump { target } | IrOp::CondJump { target, .. } => target.direct(),
            _ => None,
        }
    }

    /// Direct call destination, if any.
    pub fn call_target(&self) -> Option<u64> {
        match self {
            IrOp::Call { target } => target.direct(),
            _ => None,
        }
    }
}

/// Parse `0x`-prefixed hex or decimal, with an optional leading `-` for hex
/// displacements wrapped to two's complement.
pub fn parse_immediate(text: &str) -> Option<u64> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else if !body.is_empty() && body.chars().all(|c| c.is_ascii_digit()) {
        body.parse::<u64>().ok()?
    } else {
        return None;
    };
    Some(if negative { value.wrapping_neg() } else { value })
}
