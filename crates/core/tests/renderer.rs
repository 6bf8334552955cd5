use fireball_core::analysis::{render, render_with_variables, Variables};
use fireball_core::model::{
    Arch, Assembly, AssemblyPayload, BinaryOperator, Condition, DecodedInstruction, Ir, IrOp, Target,
};

fn asm(index: usize, parent: u64, address: u64, size: usize, text: (&str, &str)) -> Assembly {
    let insn = DecodedInstruction::new(Arch::X86_64, address, &vec![0x90; size], text.0, text.1);
    Assembly {
        index,
        parents_start_address: parent,
        data: AssemblyPayload::Decoded(insn).encode().unwrap(),
    }
}

fn ir(parent: usize, op: IrOp) -> Ir {
    Ir { parents_assembly_index: parent, data: op.encode().unwrap() }
}

fn statement_lines(text: &str) -> usize {
    text.lines()
        .filter(|l| l.starts_with("    ") && !l.trim_start().starts_with("//"))
        .filter(|l| !l.ends_with("*/"))
        .count()
}

#[test]
fn branch_splits_blocks_and_uses_labels() {
    let assembly = vec![
        asm(0, 0x1000, 0x1000, 2, ("je", "0x1004")),
        asm(1, 0x1000, 0x1002, 2, ("inc", "eax")),
        asm(2, 0x1000, 0x1004, 1, ("ret", "")),
    ];
    let ir = vec![
        ir(0, IrOp::CondJump { condition: Condition::Eq, target: Target::Direct(0x1004) }),
        ir(
            1,
            IrOp::Binary {
                dst: "eax".into(),
                lhs: "eax".into(),
                operator: BinaryOperator::Add,
                rhs: "1".into(),
            },
        ),
        ir(2, IrOp::Return),
    ];
    let text = render(&assembly, &ir);
    assert!(text.starts_with("void sub_1000(void)\n{\nloc_1000:\n"));
    assert!(text.contains("if (flags.eq) goto loc_1004;"));
    assert!(text.contains("loc_1002:"));
    assert!(text.contains("loc_1004:\n    return;"));
    assert_eq!(statement_lines(&text), ir.len());
    assert!(!text.contains("not reached"));
}

#[test]
fn call_targets_become_functions() {
    let assembly = vec![
        asm(0, 0x1000, 0x1000, 5, ("call", "0x2000")),
        asm(1, 0x1000, 0x1005, 1, ("ret", "")),
        asm(2, 0x1000, 0x2000, 1, ("ret", "")),
    ];
    let ir = vec![
        ir(0, IrOp::Call { target: Target::Direct(0x2000) }),
        ir(1, IrOp::Return),
        ir(2, IrOp::Return),
    ];
    let text = render(&assembly, &ir);
    assert!(text.contains("sub_2000();"));
    assert!(text.contains("void sub_2000(void)"));
    assert_eq!(statement_lines(&text), 3);
}

#[test]
fn every_ir_node_is_rendered_once() {
    let assembly = vec![
        asm(0, 0x10, 0x10, 1, ("nop", "")),
        Assembly { index: 1, parents_start_address: 0x10, data: "garbage".into() },
    ];
    let ir = vec![
        ir(0, IrOp::Nop),
        ir(0, IrOp::Nop),
        ir(1, IrOp::Unlifted { raw: "garbage".into() }),
        Ir { parents_assembly_index: 7, data: "{broken".into() },
    ];
    let text = render(&assembly, &ir);
    assert_eq!(statement_lines(&text), 4);
    assert!(text.contains("__unlifted(\"garbage\");"));
    assert!(text.contains("__unparsed(\"{broken\");"));
}

#[test]
fn empty_input_renders_empty_text() {
    assert_eq!(render(&[], &[]), "");
}

fn assign(parent: usize, dst: &str, src: &str) -> Ir {
    ir(parent, IrOp::Assign { dst: dst.into(), src: src.into() })
}

#[test]
fn frame_slots_are_declared_and_named() {
    let assembly = vec![
        asm(0, 0x1000, 0x1000, 4, ("mov", "qword ptr [rbp - 8], rdi")),
        asm(1, 0x1000, 0x1004, 3, ("mov", "eax, dword ptr [rbp - 8]")),
        asm(2, 0x1000, 0x1007, 1, ("ret", "")),
    ];
    let ir = vec![
        assign(0, "*(uint64_t *)(rbp - 8)", "rdi"),
        assign(1, "eax", "*(uint32_t *)(rbp - 8)"),
        ir(2, IrOp::Return),
    ];
    let text = render(&assembly, &ir);
    assert!(text.starts_with("void sub_1000(void)\n{\n    uint64_t var_8;  /* rbp - 0x8 */\n"), "{text}");
    assert!(text.contains("    var_8 = rdi;"));
    assert!(text.contains("    eax = *(uint32_t *)&var_8;"));
    assert!(!text.contains("(rbp - 8)"));
    assert_eq!(statement_lines(&text), ir.len());
}

#[test]
fn incoming_arguments_and_stack_pointer_slots() {
    let assembly = vec![
        asm(0, 0x1000, 0x1000, 4, ("mov", "eax, dword ptr [rbp + 0x10]")),
        asm(1, 0x1000, 0x1004, 4, ("ldr", "x0, [sp, #8]")),
        asm(2, 0x1000, 0x1008, 1, ("ret", "")),
    ];
    let ir = vec![
        assign(0, "eax", "*(int32_t *)(rbp + 0x10)"),
        assign(1, "x0", "*(uint64_t *)(sp + 0x8)"),
        ir(2, IrOp::Return),
    ];
    let variables = Variables::analyze(&ir);
    let names: Vec<&str> = variables.variables().iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["arg_10", "stack_8"]);
    assert_eq!(variables.variables()[0].c_type(), "int32_t");

    let text = render_with_variables(&assembly, &ir, &variables);
    assert!(text.contains("    int32_t arg_10;  /* rbp + 0x10 */"));
    assert!(text.contains("    uint64_t stack_8;  /* sp + 0x8 */"));
    assert!(text.contains("    eax = arg_10;"));
    assert!(text.contains("    x0 = stack_8;"));
}

#[test]
fn accesses_count_reads_and_writes() {
    let ir = vec![
        assign(0, "*(uint32_t *)(rbp - 0x4)", "0"),
        ir(
            1,
            IrOp::Binary {
                dst: "*(uint32_t *)(rbp - 0x4)".into(),
                lhs: "*(uint32_t *)(rbp - 0x4)".into(),
                operator: BinaryOperator::Add,
                rhs: "1".into(),
            },
        ),
        ir(2, IrOp::Compare { lhs: "*(uint8_t *)(rbp - 4)".into(), rhs: "0".into(), test: false }),
    ];
    let variables = Variables::analyze(&ir);
    assert_eq!(variables.variables().len(), 1);
    let var = &variables.variables()[0];
    assert_eq!((var.name.as_str(), var.size, var.writes, var.reads), ("var_4", 4, 2, 2));
    let positions: Vec<(usize, bool)> =
        variables.accesses().iter().map(|a| (a.ir_index, a.write)).collect();
    assert_eq!(positions, vec![(0, true), (1, true), (1, false), (2, false)]);
    assert_eq!(variables.accesses()[3].size, 1);
}

#[test]
fn non_stack_memory_is_left_alone() {
    let assembly = vec![
        asm(0, 0x1000, 0x1000, 4, ("mov", "rcx, qword ptr [rax + 8]")),
        asm(1, 0x1000, 0x1004, 1, ("ret", "")),
    ];
    let ir = vec![assign(0, "rcx", "*(uint64_t *)(rax + 8)"), ir(1, IrOp::Return)];
    assert!(Variables::analyze(&ir).is_empty());
    let text = render(&assembly, &ir);
    assert!(text.contains("    rcx = *(uint64_t *)(rax + 8);"));
    assert!(!text.contains("*/"));
}

#[test]
fn stack_slot_inside_an_address_is_a_read() {
    let ir = vec![assign(0, "*(uint8_t *)(*(uint64_t *)(rbp - 0x18) + 1)", "0")];
    let variables = Variables::analyze(&ir);
    assert_eq!(variables.variables().len(), 1);
    assert_eq!(variables.variables()[0].reads, 1);
    assert_eq!(variables.variables()[0].writes, 0);
    let renamed = variables.rename(&IrOp::decode(&ir[0].data).unwrap());
    assert_eq!(renamed, IrOp::Assign { dst: "*(uint8_t *)(var_18 + 1)".into(), src: "0".into() });
}
