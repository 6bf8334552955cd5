use crate::backends::rules::{c_type, split_operands, unliftable, FamilyRules};
use crate::error::LiftError;
use crate::model::{
    parse_immediate, Arch, BinaryOperator, Condition, DecodedInstruction, InstructionFamily, IrOp,
    Target, UnaryOperator,
};

/// Rules for x86 and x86-64 in Intel syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct X86Rules;

impl FamilyRules for X86Rules {
    fn family(&self) -> InstructionFamily {
        InstructionFamily::X86
    }

    fn lift(&self, insn: &DecodedInstruction) -> Result<Vec<IrOp>, LiftError> {
        let ops = split_operands(&insn.operands);
        let operand = |i: usize| -> Result<String, LiftError> {
            ops.get(i).map(|text| operand_expr(text, insn)).ok_or_else(|| unliftable(insn))
        };
        let arity = |n: usize| -> Result<(), LiftError> {
            if ops.len() == n {
                Ok(())
            } else {
                Err(unliftable(insn))
            }
        };

        let mnemonic = strip_prefixes(&insn.mnemonic);
        if mnemonic.starts_with("rep") {
            return Ok(vec![IrOp::Intrinsic {
                name: mnemonic.replace(' ', "_"),
                args: ops.iter().map(|o| operand_expr(o, insn)).collect(),
            }]);
        }

        let lifted = match mnemonic {
            "mov" | "movabs" | "movzx" | "movaps" | "movups" | "movdqa" | "movdqu" | "movq"
            | "movd" | "movss" => {
                arity(2)?;
                vec![IrOp::Assign { dst: operand(0)?, src: operand(1)? }]
            }
            "movsd" if ops.len() == 2 => {
                vec![IrOp::Assign { dst: operand(0)?, src: operand(1)? }]
            }
            "movsx" | "movsxd" => {
                arity(2)?;
                let src = format!("({}){}", c_type(operand_size(&ops[1], insn), true), operand(1)?);
                vec![IrOp::Assign { dst: operand(0)?, src }]
            }
            "lea" => {
                arity(2)?;
                let src = address_expr(&ops[1], insn).ok_or_else(|| unliftable(insn))?;
                vec![IrOp::Assign { dst: operand(0)?, src }]
            }
            "xor" | "pxor" | "xorps" if ops.len() == 2 && ops[0] == ops[1] => {
                vec![IrOp::Assign { dst: operand(0)?, src: "0".into() }]
            }
            "add" | "sub" | "and" | "or" | "xor" | "shl" | "sal" | "shr" | "sar" | "pxor"
            | "xorps" | "andps" | "orps" => {
                let operator = binary_operator(mnemonic).ok_or_else(|| unliftable(insn))?;
                let dst = operand(0)?;
                // Single-operand shifts shift by one.
                let rhs = if ops.len() == 1 { "1".to_string() } else { operand(1)? };
                if ops.len() > 2 {
                    return Err(unliftable(insn));
                }
                vec![IrOp::Binary { lhs: dst.clone(), dst, operator, rhs }]
            }
            "imul" => match ops.len() {
                1 => vec![IrOp::Binary {
                    dst: accumulator(insn.arch).into(),
                    lhs: accumulator(insn.arch).into(),
                    operator: BinaryOperator::Mul,
                    rhs: operand(0)?,
                }],
                2 => {
                    let dst = operand(0)?;
                    vec![IrOp::Binary {
                        lhs: dst.clone(),
                        dst,
                        operator: BinaryOperator::Mul,
                        rhs: operand(1)?,
                    }]
                }
                3 => vec![IrOp::Binary {
                    dst: operand(0)?,
                    lhs: operand(1)?,
                    operator: BinaryOperator::Mul,
                    rhs: operand(2)?,
                }],
                _ => return Err(unliftable(insn)),
            },
            "mul" => {
                arity(1)?;
                vec![IrOp::Binary {
                    dst: accumulator(insn.arch).into(),
                    lhs: accumulator(insn.arch).into(),
                    operator: BinaryOperator::Mul,
                    rhs: operand(0)?,
                }]
            }
            "div" | "idiv" => {
                arity(1)?;
                let divisor = operand(0)?;
                let acc = accumulator(insn.arch);
                let rem = remainder_register(insn.arch);
                vec![
                    IrOp::Binary {
                        dst: rem.into(),
                        lhs: acc.into(),
                        operator: BinaryOperator::Rem,
                        rhs: divisor.clone(),
                    },
                    IrOp::Binary {
                        dst: acc.into(),
                        lhs: acc.into(),
                        operator: BinaryOperator::Div,
                        rhs: divisor,
                    },
                ]
            }
            "inc" | "dec" => {
                arity(1)?;
                let dst = operand(0)?;
                let operator =
                    if mnemonic == "inc" { BinaryOperator::Add } else { BinaryOperator::Sub };
                vec![IrOp::Binary { lhs: dst.clone(), dst, operator, rhs: "1".into() }]
            }
            "neg" | "not" => {
                arity(1)?;
                let dst = operand(0)?;
                let operator = if mnemonic == "neg" { UnaryOperator::Neg } else { UnaryOperator::Not };
                vec![IrOp::Unary { src: dst.clone(), dst, operator }]
            }
            "xchg" => {
                arity(2)?;
                vec![IrOp::Intrinsic { name: "xchg".into(), args: vec![operand(0)?, operand(1)?] }]
            }
            "cmp" | "test" => {
                arity(2)?;
                vec![IrOp::Compare { lhs: operand(0)?, rhs: operand(1)?, test: mnemonic == "test" }]
            }
            "push" => {
                arity(1)?;
                vec![IrOp::Push { value: operand(0)? }]
            }
            "pop" => {
                arity(1)?;
                vec![IrOp::Pop { dst: operand(0)? }]
            }
            "leave" => {
                let (sp, bp) = match insn.arch {
                    Arch::X86 => ("esp", "ebp"),
                    _ => ("rsp", "rbp"),
                };
                vec![IrOp::Assign { dst: sp.into(), src: bp.into() }, IrOp::Pop { dst: bp.into() }]
            }
            "jmp" => {
                arity(1)?;
                vec![IrOp::Jump { target: target(&ops[0], insn) }]
            }
            "jrcxz" | "jecxz" | "jcxz" => {
                arity(1)?;
                let counter = &mnemonic[1..mnemonic.len() - 1];
                vec![IrOp::CondJump {
                    condition: Condition::Zero { operand: counter.to_string() },
                    target: target(&ops[0], insn),
                }]
            }
            m if jump_condition(m).is_some() => {
                arity(1)?;
                let condition = jump_condition(m).ok_or_else(|| unliftable(insn))?;
                vec![IrOp::CondJump { condition, target: target(&ops[0], insn) }]
            }
            m if m.starts_with("set") && jump_condition(&format!("j{}", &m[3..])).is_some() => {
                arity(1)?;
                let condition =
                    jump_condition(&format!("j{}", &m[3..])).ok_or_else(|| unliftable(insn))?;
                vec![IrOp::Assign { dst: operand(0)?, src: format!("({condition}) ? 1 : 0") }]
            }
            m if m.starts_with("cmov") && jump_condition(&format!("j{}", &m[4..])).is_some() => {
                arity(2)?;
                let condition =
                    jump_condition(&format!("j{}", &m[4..])).ok_or_else(|| unliftable(insn))?;
                let dst = operand(0)?;
                let src = format!("({condition}) ? {} : {dst}", operand(1)?);
                vec![IrOp::Assign { dst, src }]
            }
            "call" => {
                arity(1)?;
                vec![IrOp::Call { target: target(&ops[0], insn) }]
            }
            "ret" | "retn" | "retf" => vec![IrOp::Return],
            "cdqe" => vec![IrOp::Assign { dst: "rax".into(), src: "(int64_t)(int32_t)eax".into() }],
            "cwde" => vec![IrOp::Assign { dst: "eax".into(), src: "(int32_t)(int16_t)ax".into() }],
            "cdq" => vec![IrOp::Assign { dst: "edx".into(), src: "(int32_t)eax >> 31".into() }],
            "cqo" => vec![IrOp::Assign { dst: "rdx".into(), src: "(int64_t)rax >> 63".into() }],
            "nop" | "fnop" | "pause" | "endbr64" | "endbr32" => vec![IrOp::Nop],
            "int3" | "ud2" => vec![IrOp::Intrinsic { name: "trap".into(), args: vec![] }],
            "hlt" => vec![IrOp::Intrinsic { name: "halt".into(), args: vec![] }],
            "syscall" | "sysenter" => vec![IrOp::Intrinsic { name: "syscall".into(), args: vec![] }],
            "int" => {
                arity(1)?;
                vec![IrOp::Intrinsic { name: "interrupt".into(), args: vec![operand(0)?] }]
            }
            "cpuid" | "rdtsc" | "cld" | "std" | "mfence" | "lfence" | "sfence" => {
                vec![IrOp::Intrinsic { name: mnemonic.to_string(), args: vec![] }]
            }
            "stosb" | "stosw" | "stosd" | "stosq" | "lodsb" | "lodsw" | "lodsd" | "lodsq"
            | "movsb" | "movsw" | "movsd" | "movsq" | "scasb" | "cmpsb" => {
                vec![IrOp::Intrinsic { name: mnemonic.to_string(), args: vec![] }]
            }
            _ => return Err(unliftable(insn)),
        };
        Ok(lifted)
    }
}

/// Drop prefixes that do not change the lifted meaning.
fn strip_prefixes(mnemonic: &str) -> &str {
    let mut m = mnemonic.trim();
    for prefix in ["lock ", "bnd ", "notrack "] {
        if let Some(rest) = m.strip_prefix(prefix) {
            m = rest.trim_start();
        }
    }
    m
}

fn binary_operator(mnemonic: &str) -> Option<BinaryOperator> {
    Some(match mnemonic {
        "add" => BinaryOperator::Add,
        "sub" => BinaryOperator::Sub,
        "and" | "andps" => BinaryOperator::And,
        "or" | "orps" => BinaryOperator::Or,
        "xor" | "pxor" | "xorps" => BinaryOperator::Xor,
        "shl" | "sal" => BinaryOperator::Shl,
        "shr" => BinaryOperator::Shr,
        "sar" => BinaryOperator::Sar,
        _ => return None,
    })
}

fn jump_condition(mnemonic: &str) -> Option<Condition> {
    Some(match mnemonic {
        "je" | "jz" => Condition::Eq,
        "jne" | "jnz" => Condition::Ne,
        "jl" | "jnge" => Condition::Lt,
        "jle" | "jng" => Condition::Le,
        "jg" | "jnle" => Condition::Gt,
        "jge" | "jnl" => Condition::Ge,
        "jb" | "jc" | "jnae" => Condition::Below,
        "jbe" | "jna" => Condition::BelowEq,
        "ja" | "jnbe" => Condition::Above,
        "jae" | "jnb" | "jnc" => Condition::AboveEq,
        "js" => Condition::Sign,
        "jns" => Condition::NotSign,
        "jo" => Condition::Overflow,
        "jno" => Condition::NotOverflow,
        "jp" | "jpe" => Condition::Parity,
        "jnp" | "jpo" => Condition::NotParity,
        _ => return None,
    })
}

fn accumulator(arch: Arch) -> &'static str {
    match arch {
        Arch::X86 => "eax",
        _ => "rax",
    }
}

fn remainder_register(arch: Arch) -> &'static str {
    match arch {
        Arch::X86 => "edx",
        _ => "rdx",
    }
}

fn size_keyword(text: &str) -> Option<(u32, &str)> {
    const SIZES: [(&str, u32); 7] = [
        ("byte ptr ", 1),
        ("word ptr ", 2),
        ("dword ptr ", 4),
        ("qword ptr ", 8),
        ("tbyte ptr ", 10),
        ("xmmword ptr ", 16),
        ("ymmword ptr ", 32),
    ];
    SIZES.iter().find_map(|(kw, size)| text.strip_prefix(kw).map(|rest| (*size, rest)))
}

fn operand_size(text: &str, insn: &DecodedInstruction) -> u32 {
    if let Some((size, _)) = size_keyword(text.trim()) {
        return size;
    }
    register_size(text.trim()).unwrap_or_else(|| insn.arch.pointer_size())
}

fn register_size(reg: &str) -> Option<u32> {
    const BYTE: [&str; 8] = ["al", "bl", "cl", "dl", "sil", "dil", "spl", "bpl"];
    const WORD: [&str; 8] = ["ax", "bx", "cx", "dx", "si", "di", "sp", "bp"];
    if BYTE.contains(&reg) || (reg.starts_with('r') && reg.ends_with('b')) || reg.ends_with('h') {
        Some(1)
    } else if WORD.contains(&reg) || (reg.starts_with('r') && reg.ends_with('w')) {
        Some(2)
    } else if reg.starts_with('e') || (reg.starts_with('r') && reg.ends_with('d')) {
        Some(4)
    } else if reg.starts_with('r') {
        Some(8)
    } else {
        None
    }
}

/// The address computed by a memory operand, with `rip`/`eip` folded to an
/// absolute address when the displacement is an immediate.
fn address_expr(text: &str, insn: &DecodedInstruction) -> Option<String> {
    let text = text.trim();
    let body = size_keyword(text).map(|(_, rest)| rest).unwrap_or(text);
    let open = body.find('[')?;
    let close = body.rfind(']')?;
    let segment = body[..open].trim().trim_end_matches(':');
    let inner = body[open + 1..close].trim();

    let next = insn.address.wrapping_add(insn.size);
    let mut expr = inner.to_string();
    for pc in ["rip", "eip"] {
        if let Some(rest) = inner.strip_prefix(pc) {
            let rest = rest.trim();
            let folded = if rest.is_empty() {
                Some(next)
            } else if let Some(disp) = rest.strip_prefix('+') {
                parse_immediate(disp).map(|d| next.wrapping_add(d))
            } else if let Some(disp) = rest.strip_prefix('-') {
                parse_immediate(disp).map(|d| next.wrapping_sub(d))
            } else {
                None
            };
            if let Some(address) = folded {
                expr = format!("0x{address:x}");
            }
        }
    }
    if !segment.is_empty() {
        expr = format!("{segment}_base + {expr}");
    }
    Some(expr)
}

/// C expression for one operand: registers and immediates as-is, memory as
/// a typed dereference.
fn operand_expr(text: &str, insn: &DecodedInstruction) -> String {
    let text = text.trim();
    if !text.contains('[') {
        return text.to_string();
    }
    let size = operand_size(text, insn);
    match address_expr(text, insn) {
        Some(address) => format!("*({} *)({address})", c_type(size, false)),
        None => text.to_string(),
    }
}

fn target(text: &str, insn: &DecodedInstruction) -> Target {
    match parse_immediate(text) {
        Some(address) => Target::Direct(address),
        None => Target::Indirect(operand_expr(text, insn)),
    }
}
