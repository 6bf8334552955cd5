use std::cell::RefCell;
use std::collections::HashMap;

use capstone::{arch, prelude::*, Capstone, InsnGroupId};

use crate::backends::{DecodedUnit, Decoder, EdgeKind, Successor};
use crate::error::{DecodeError, DecompileError};
use crate::model::{Arch, DecodedInstruction};

/// Capstone-backed decoder for x86, x86-64, ARM and AArch64.
///
/// Capstone handles are not shareable across threads, so each worker thread
/// builds its own handle per architecture on first use.
#[derive(Debug, Clone, Copy)]
pub struct CapstoneDecoder {
    arch: Arch,
}

thread_local! {
    static HANDLES: RefCell<HashMap<Arch, Capstone>> = RefCell::new(HashMap::new());
}

fn make_cs(arch: Arch) -> Result<Capstone, DecompileError> {
    let built = match arch {
        Arch::X86_64 => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).detail(true).build()
        }
        Arch::X86 => Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).detail(true).build(),
        Arch::Arm => Capstone::new().arm().mode(arch::arm::ArchMode::Arm).detail(true).build(),
        Arch::Arm64 => {
            Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).detail(true).build()
        }
    };
    built.map_err(|e| DecompileError::Backend(format!("capstone init failed for {arch}: {e}")))
}

/// Version of the linked capstone library, `major.minor`.
pub fn capstone_version() -> String {
    let (major, minor) = Capstone::lib_version();
    format!("{major}.{minor}")
}

fn immediate_target(detail: &capstone::InsnDetail) -> Option<u64> {
    detail.arch_detail().operands().iter().find_map(|op| match op {
        capstone::arch::ArchOperand::X86Operand(op) => {
            if let capstone::arch::x86::X86OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::ArmOperand(op) => {
            if let capstone::arch::arm::ArmOperandType::Imm(imm) = op.op_type {
                Some(imm as u32 as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::Arm64Operand(op) => {
            if let capstone::arch::arm64::Arm64OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        _ => None,
    })
}

const ARM_CONDITION_CODES: [&str; 16] = [
    "eq", "ne", "cs", "hs", "cc", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le",
];

fn is_conditional_jump(arch: Arch, mnemonic: &str) -> bool {
    match arch {
        Arch::X86 | Arch::X86_64 => mnemonic.starts_with('j') && mnemonic != "jmp",
        Arch::Arm64 => {
            mnemonic.starts_with("b.")
                || matches!(mnemonic, "cbz" | "cbnz" | "tbz" | "tbnz")
        }
        Arch::Arm => {
            mnemonic.strip_prefix('b').is_some_and(|cc| ARM_CONDITION_CODES.contains(&cc))
                || matches!(mnemonic, "cbz" | "cbnz")
        }
    }
}

fn stops_flow(mnemonic: &str) -> bool {
    matches!(mnemonic, "hlt" | "ud2" | "udf" | "brk")
}

impl CapstoneDecoder {
    pub fn new(arch: Arch) -> Result<Self, DecompileError> {
        // Fail early if the architecture cannot be initialised at all.
        make_cs(arch)?;
        Ok(Self { arch })
    }

    fn with_handle<T>(
        &self,
        f: impl FnOnce(&Capstone) -> Result<T, DecodeError>,
        address: u64,
    ) -> Result<T, DecodeError> {
        HANDLES.with(|handles| {
            let mut handles = handles.borrow_mut();
            if !handles.contains_key(&self.arch) {
                let cs = make_cs(self.arch).map_err(|e| {
                    tracing::warn!(error = %e, "capstone handle unavailable");
                    DecodeError::InvalidEncoding { address }
                })?;
                handles.insert(self.arch, cs);
            }
            match handles.get(&self.arch) {
                Some(cs) => f(cs),
                None => Err(DecodeError::InvalidEncoding { address }),
            }
        })
    }
}

impl Decoder for CapstoneDecoder {
    fn decode(&self, bytes: &[u8], address: u64) -> Result<DecodedUnit, DecodeError> {
        let arch = self.arch;
        self.with_handle(
            |cs| {
                let insns = cs
                    .disasm_count(bytes, address, 1)
                    .map_err(|_| DecodeError::InvalidEncoding { address })?;
                let insn =
                    insns.iter().next().ok_or(DecodeError::InvalidEncoding { address })?;
                let mnemonic = insn.mnemonic().unwrap_or("").to_lowercase();
                let operands = insn.op_str().unwrap_or("").to_string();
                let length = insn.bytes().len() as u64;
                if length == 0 {
                    return Err(DecodeError::InvalidEncoding { address });
                }
                let next = address.wrapping_add(length);

                let mut successors = Vec::new();
                match cs.insn_detail(insn) {
                    Ok(detail) => {
                        let in_group = |group: capstone::InsnGroupType::Type| {
                            detail.groups().iter().any(|g| *g == InsnGroupId(group as u8))
                        };
                        let is_call = in_group(capstone::InsnGroupType::CS_GRP_CALL);
                        let is_jump = in_group(capstone::InsnGroupType::CS_GRP_JUMP);
                        let is_ret = in_group(capstone::InsnGroupType::CS_GRP_RET);
                        let target = immediate_target(&detail);

                        if is_ret || stops_flow(&mnemonic) {
                            // No successors.
                        } else if is_call {
                            successors.push(Successor::new(next, EdgeKind::Fallthrough));
                            if let Some(target) = target {
                                successors.push(Successor::new(target, EdgeKind::Call));
                            }
                        } else if is_jump {
                            if is_conditional_jump(arch, &mnemonic) {
                                successors.push(Successor::new(next, EdgeKind::Fallthrough));
                                if let Some(target) = target {
                                    successors
                                        .push(Successor::new(target, EdgeKind::ConditionalJump));
                                }
                            } else if let Some(target) = target {
                                successors.push(Successor::new(target, EdgeKind::Jump));
                            }
                        } else {
                            successors.push(Successor::new(next, EdgeKind::Fallthrough));
                        }
                    }
                    Err(_) => successors.push(Successor::new(next, EdgeKind::Fallthrough)),
                }

                Ok(DecodedUnit {
                    instruction: DecodedInstruction::new(
                        arch,
                        address,
                        insn.bytes(),
                        mnemonic,
                        operands,
                    ),
                    length,
                    successors,
                })
            },
            address,
        )
    }

    fn arch(&self) -> Arch {
        self.arch
    }

    fn max_instruction_len(&self) -> usize {
        match self.arch {
            Arch::X86 | Arch::X86_64 => 15,
            Arch::Arm | Arch::Arm64 => 4,
        }
    }

    fn name(&self) -> &'static str {
        "capstone"
    }
}
