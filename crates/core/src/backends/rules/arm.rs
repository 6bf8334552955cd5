use crate::backends::rules::{c_type, split_operands, unliftable, FamilyRules};
use crate::error::LiftError;
use crate::model::{
    parse_immediate, Arch, BinaryOperator, Condition, DecodedInstruction, InstructionFamily, IrOp,
    Target, UnaryOperator,
};

/// Rules for 32-bit ARM and AArch64, as printed by capstone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmRules;

impl FamilyRules for ArmRules {
    fn family(&self) -> InstructionFamily {
        InstructionFamily::Arm
    }

    fn lift(&self, insn: &DecodedInstruction) -> Result<Vec<IrOp>, LiftError> {
        let ops = split_operands(&insn.operands);
        let operand = |i: usize| -> Result<String, LiftError> {
            ops.get(i).map(|text| value_expr(text)).ok_or_else(|| unliftable(insn))
        };
        let arity = |n: usize| -> Result<(), LiftError> {
            if ops.len() == n {
                Ok(())
            } else {
                Err(unliftable(insn))
            }
        };
        let mnemonic = insn.mnemonic.trim();

        let lifted = match mnemonic {
            "mov" | "movz" | "movw" => {
                arity(2)?;
                vec![IrOp::Assign { dst: operand(0)?, src: operand(1)? }]
            }
            "movk" => {
                let dst = operand(0)?;
                let imm = operand(1)?;
                let shift = ops.get(2).and_then(|s| shift_amount(s)).unwrap_or(0);
                vec![IrOp::Assign {
                    src: format!("({dst} & ~(0xffff << {shift})) | ({imm} << {shift})"),
                    dst,
                }]
            }
            "movt" => {
                arity(2)?;
                let dst = operand(0)?;
                vec![IrOp::Assign { src: format!("({dst} & 0xffff) | ({} << 16)", operand(1)?), dst }]
            }
            "mvn" | "neg" => {
                arity(2)?;
                let operator = if mnemonic == "mvn" { UnaryOperator::Not } else { UnaryOperator::Neg };
                vec![IrOp::Unary { dst: operand(0)?, operator, src: operand(1)? }]
            }
            "adr" | "adrp" => {
                arity(2)?;
                vec![IrOp::Assign { dst: operand(0)?, src: operand(1)? }]
            }
            m if binary_operator(m).is_some() => {
                let operator = binary_operator(m).ok_or_else(|| unliftable(insn))?;
                let (dst, lhs, rhs) = three_operand(&ops).ok_or_else(|| unliftable(insn))?;
                let mut lifted = Vec::new();
                match m {
                    "subs" => lifted.push(IrOp::Compare {
                        lhs: lhs.clone(),
                        rhs: rhs.clone(),
                        test: false,
                    }),
                    "ands" => lifted.push(IrOp::Compare {
                        lhs: lhs.clone(),
                        rhs: rhs.clone(),
                        test: true,
                    }),
                    _ => {}
                }
                lifted.push(IrOp::Binary { dst: dst.clone(), lhs, operator, rhs });
                if m == "adds" {
                    lifted.push(IrOp::Compare { lhs: dst, rhs: "0".into(), test: false });
                }
                lifted
            }
            "madd" | "msub" => {
                arity(4)?;
                let sign = if mnemonic == "madd" { "+" } else { "-" };
                vec![IrOp::Assign {
                    dst: operand(0)?,
                    src: format!("{} {sign} {} * {}", operand(3)?, operand(1)?, operand(2)?),
                }]
            }
            "sxtw" | "sxth" | "sxtb" | "uxtw" | "uxth" | "uxtb" => {
                arity(2)?;
                let signed = mnemonic.starts_with('s');
                let size = match mnemonic.as_bytes()[3] {
                    b'b' => 1,
                    b'h' => 2,
                    _ => 4,
                };
                vec![IrOp::Assign {
                    dst: operand(0)?,
                    src: format!("({}){}", c_type(size, signed), operand(1)?),
                }]
            }
            "cmp" | "cmn" | "tst" => {
                arity(2)?;
                let rhs = if mnemonic == "cmn" { format!("-{}", operand(1)?) } else { operand(1)? };
                vec![IrOp::Compare { lhs: operand(0)?, rhs, test: mnemonic == "tst" }]
            }
            "csel" | "csinc" | "csneg" | "csinv" => {
                arity(4)?;
                let condition = condition_code(&ops[3]).ok_or_else(|| unliftable(insn))?;
                let other = match mnemonic {
                    "csinc" => format!("{} + 1", operand(2)?),
                    "csneg" => format!("-{}", operand(2)?),
                    "csinv" => format!("~{}", operand(2)?),
                    _ => operand(2)?,
                };
                vec![IrOp::Assign {
                    dst: operand(0)?,
                    src: format!("({condition}) ? {} : {other}", operand(1)?),
                }]
            }
            "cset" | "csetm" => {
                arity(2)?;
                let condition = condition_code(&ops[1]).ok_or_else(|| unliftable(insn))?;
                let set = if mnemonic == "cset" { "1" } else { "-1" };
                vec![IrOp::Assign { dst: operand(0)?, src: format!("({condition}) ? {set} : 0") }]
            }
            m if load_store(m).is_some() => {
                let (kind, size, signed) = load_store(m).ok_or_else(|| unliftable(insn))?;
                lift_load_store(insn, &ops, kind, size, signed)?
            }
            "push" | "pop" => {
                arity(1)?;
                lift_push_pop(mnemonic, &ops[0]).ok_or_else(|| unliftable(insn))?
            }
            "b" => {
                arity(1)?;
                vec![IrOp::Jump { target: target(&ops[0]) }]
            }
            "bl" | "blx" => {
                arity(1)?;
                vec![IrOp::Call { target: target(&ops[0]) }]
            }
            "blr" => {
                arity(1)?;
                vec![IrOp::Call { target: Target::Indirect(operand(0)?) }]
            }
            "br" => {
                arity(1)?;
                vec![IrOp::Jump { target: Target::Indirect(operand(0)?) }]
            }
            "bx" if ops.first().map(String::as_str) == Some("lr") => vec![IrOp::Return],
            "bx" => {
                arity(1)?;
                vec![IrOp::Jump { target: Target::Indirect(operand(0)?) }]
            }
            "ret" | "retaa" | "retab" => vec![IrOp::Return],
            "cbz" | "cbnz" => {
                arity(2)?;
                let reg = operand(0)?;
                let condition = if mnemonic == "cbz" {
                    Condition::Zero { operand: reg }
                } else {
                    Condition::NonZero { operand: reg }
                };
                vec![IrOp::CondJump { condition, target: target(&ops[1]) }]
            }
            "tbz" | "tbnz" => {
                arity(3)?;
                let bit = format!("(({} >> {}) & 1)", operand(0)?, operand(1)?);
                let condition = if mnemonic == "tbz" {
                    Condition::Zero { operand: bit }
                } else {
                    Condition::NonZero { operand: bit }
                };
                vec![IrOp::CondJump { condition, target: target(&ops[2]) }]
            }
            m if conditional_branch(m).is_some() => {
                arity(1)?;
                let condition = conditional_branch(m).ok_or_else(|| unliftable(insn))?;
                vec![IrOp::CondJump { condition, target: target(&ops[0]) }]
            }
            "svc" | "swi" => vec![IrOp::Intrinsic {
                name: "syscall".into(),
                args: ops.iter().map(|o| value_expr(o)).collect(),
            }],
            "brk" | "udf" | "bkpt" => vec![IrOp::Intrinsic { name: "trap".into(), args: vec![] }],
            "nop" | "hint" | "yield" | "bti" | "paciasp" | "autiasp" | "pacibsp" | "autibsp" => {
                vec![IrOp::Nop]
            }
            "dmb" | "dsb" | "isb" => vec![IrOp::Intrinsic {
                name: mnemonic.to_string(),
                args: ops.iter().map(|o| value_expr(o)).collect(),
            }],
            _ => return Err(unliftable(insn)),
        };
        Ok(lifted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Load,
    Store,
    LoadPair,
    StorePair,
}

/// Classify a load/store mnemonic into (kind, access size, sign-extension).
/// A size of 0 means "the width of the data register".
fn load_store(mnemonic: &str) -> Option<(Access, u32, bool)> {
    Some(match mnemonic {
        "ldr" | "ldur" | "ldar" | "ldxr" | "ldaxr" => (Access::Load, 0, false),
        "ldrb" | "ldurb" | "ldarb" => (Access::Load, 1, false),
        "ldrh" | "ldurh" | "ldarh" => (Access::Load, 2, false),
        "ldrsb" | "ldursb" => (Access::Load, 1, true),
        "ldrsh" | "ldursh" => (Access::Load, 2, true),
        "ldrsw" | "ldursw" => (Access::Load, 4, true),
        "str" | "stur" | "stlr" => (Access::Store, 0, false),
        "strb" | "sturb" | "stlrb" => (Access::Store, 1, false),
        "strh" | "sturh" | "stlrh" => (Access::Store, 2, false),
        "ldp" | "ldnp" => (Access::LoadPair, 0, false),
        "ldpsw" => (Access::LoadPair, 4, true),
        "stp" | "stnp" => (Access::StorePair, 0, false),
        _ => return None,
    })
}

/// Width in bytes of the register a load/store moves.
fn register_width(reg: &str, arch: Arch) -> u32 {
    match (reg.chars().next(), arch) {
        (Some('q'), _) => 16,
        (Some('d'), _) => 8,
        (_, Arch::Arm) => 4,
        (Some('w'), _) | (Some('s'), _) if reg != "sp" => 4,
        (Some('h'), _) => 2,
        (Some('b'), _) => 1,
        _ => 8,
    }
}

struct MemoryOperand {
    address: String,
    /// Base register update applied after the access (`[base, #off]!` or
    /// post-index `[base], #off`).
    writeback: Option<(String, String)>,
}

/// Parse `[base]`, `[base, #off]`, `[base, #off]!`, `[base, reg, lsl #n]`
/// and the post-index form whose offset is the next operand.
fn memory_operand(text: &str, post_index: Option<&str>) -> Option<MemoryOperand> {
    let text = text.trim();
    if !text.starts_with('[') {
        // Literal-pool reference: `ldr x0, #0x1000` or `ldr r0, =label`.
        let literal = text.trim_start_matches('#').trim_start_matches('=');
        return Some(MemoryOperand { address: literal.to_string(), writeback: None });
    }
    let pre_index = text.ends_with('!');
    let inner = text.trim_end_matches('!').trim_start_matches('[').trim_end_matches(']');
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    let base = (*parts.first()?).to_string();
    let offset = match parts.len() {
        1 => None,
        2 => Some(value_expr(parts[1])),
        3 => {
            let scale = shift_amount(parts[2]).unwrap_or(0);
            Some(format!("({} << {scale})", value_expr(parts[1])))
        }
        _ => return None,
    };

    let with_offset = |offset: &str| match parse_immediate(offset) {
        Some(value) if (value as i64) < 0 => format!("{base} - 0x{:x}", (value as i64).unsigned_abs()),
        _ => format!("{base} + {offset}"),
    };

    if let Some(post) = post_index {
        let post = value_expr(post);
        return Some(MemoryOperand {
            address: base.clone(),
            writeback: Some((base.clone(), with_offset(&post))),
        });
    }
    let address = match &offset {
        Some(offset) => with_offset(offset),
        None => base.clone(),
    };
    let writeback = if pre_index { Some((base.clone(), address.clone())) } else { None };
    Some(MemoryOperand { address, writeback })
}

fn lift_load_store(
    insn: &DecodedInstruction,
    ops: &[String],
    kind: Access,
    size: u32,
    signed: bool,
) -> Result<Vec<IrOp>, LiftError> {
    let pair = matches!(kind, Access::LoadPair | Access::StorePair);
    let regs = if pair { 2 } else { 1 };
    if ops.len() < regs + 1 || ops.len() > regs + 2 {
        return Err(unliftable(insn));
    }
    let post_indexed = ops.len() == regs + 2;
    let memory = memory_operand(&ops[regs], ops.get(regs + 1).map(String::as_str))
        .ok_or_else(|| unliftable(insn))?;

    let mut lifted = Vec::new();
    // Pre-index writeback updates the base first and the access goes
    // through the updated base.
    let access_base = match &memory.writeback {
        Some((base, value)) if !post_indexed => {
            lifted.push(IrOp::Assign { dst: base.clone(), src: value.clone() });
            base.clone()
        }
        _ => memory.address.clone(),
    };

    for (slot, reg) in ops[..regs].iter().enumerate() {
        let width = if size == 0 { register_width(reg, insn.arch) } else { size };
        let address = if slot == 0 {
            access_base.clone()
        } else {
            format!("{access_base} + 0x{:x}", slot as u32 * width)
        };
        let deref = format!("*({} *)({address})", c_type(width, signed));
        match kind {
            Access::Load | Access::LoadPair => {
                lifted.push(IrOp::Assign { dst: reg.clone(), src: deref });
            }
            Access::Store | Access::StorePair => {
                lifted.push(IrOp::Assign { dst: deref, src: reg.clone() });
            }
        }
    }
    if post_indexed {
        if let Some((base, value)) = memory.writeback {
            lifted.push(IrOp::Assign { dst: base, src: value });
        }
    }
    Ok(lifted)
}

/// `push {r4, lr}` stores the highest register first; `pop {r4, pc}`
/// restores in list order and returns when `pc` is loaded.
fn lift_push_pop(mnemonic: &str, list: &str) -> Option<Vec<IrOp>> {
    let regs: Vec<String> = list
        .trim()
        .strip_prefix('{')?
        .strip_suffix('}')?
        .split(',')
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if mnemonic == "push" {
        return Some(regs.into_iter().rev().map(|value| IrOp::Push { value }).collect());
    }
    let mut lifted = Vec::new();
    let mut returns = false;
    for reg in regs {
        if reg == "pc" {
            returns = true;
        }
        lifted.push(IrOp::Pop { dst: reg });
    }
    if returns {
        lifted.push(IrOp::Return);
    }
    Some(lifted)
}

fn binary_operator(mnemonic: &str) -> Option<BinaryOperator> {
    Some(match mnemonic {
        "add" | "adds" => BinaryOperator::Add,
        "sub" | "subs" => BinaryOperator::Sub,
        "mul" => BinaryOperator::Mul,
        "udiv" | "sdiv" => BinaryOperator::Div,
        "and" | "ands" => BinaryOperator::And,
        "orr" => BinaryOperator::Or,
        "eor" => BinaryOperator::Xor,
        "lsl" => BinaryOperator::Shl,
        "lsr" => BinaryOperator::Shr,
        "asr" => BinaryOperator::Sar,
        _ => return None,
    })
}

/// `(dst, lhs, rhs)` for both `op d, n, m` and the two-operand `op d, m`
/// form; a trailing shift on `m` is folded into `rhs`.
fn three_operand(ops: &[String]) -> Option<(String, String, String)> {
    match ops.len() {
        2 => Some((value_expr(&ops[0]), value_expr(&ops[0]), value_expr(&ops[1]))),
        3 => Some((value_expr(&ops[0]), value_expr(&ops[1]), value_expr(&ops[2]))),
        4 => {
            let (kind, amount) = ops[3].trim().split_once(' ')?;
            let operator = match kind {
                "lsl" => "<<",
                "lsr" | "asr" => ">>",
                _ => return None,
            };
            Some((
                value_expr(&ops[0]),
                value_expr(&ops[1]),
                format!("({} {operator} {})", value_expr(&ops[2]), value_expr(amount)),
            ))
        }
        _ => None,
    }
}

fn shift_amount(text: &str) -> Option<u32> {
    let (_, amount) = text.trim().split_once(' ')?;
    parse_immediate(amount.trim().trim_start_matches('#')).map(|v| v as u32)
}

fn condition_code(code: &str) -> Option<Condition> {
    Some(match code.trim() {
        "eq" => Condition::Eq,
        "ne" => Condition::Ne,
        "lt" => Condition::Lt,
        "le" => Condition::Le,
        "gt" => Condition::Gt,
        "ge" => Condition::Ge,
        "lo" | "cc" => Condition::Below,
        "ls" => Condition::BelowEq,
        "hi" => Condition::Above,
        "hs" | "cs" => Condition::AboveEq,
        "mi" => Condition::Sign,
        "pl" => Condition::NotSign,
        "vs" => Condition::Overflow,
        "vc" => Condition::NotOverflow,
        _ => return None,
    })
}

/// `b.eq` (AArch64) or `beq` (ARM).
fn conditional_branch(mnemonic: &str) -> Option<Condition> {
    let code = mnemonic.strip_prefix("b.").or_else(|| mnemonic.strip_prefix('b'))?;
    condition_code(code)
}

/// Registers stay as they are; `#imm` drops the marker.
fn value_expr(text: &str) -> String {
    text.trim().trim_start_matches('#').to_string()
}

fn target(text: &str) -> Target {
    Target::from_operand(text)
}
