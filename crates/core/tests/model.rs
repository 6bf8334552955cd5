use fireball_core::model::{
    parse_immediate, Arch, Assembly, AssemblyPayload, Condition, DecodedInstruction, DecompileResult,
    Ir, IrOp, KnownSection, Target,
};

#[test]
fn known_section_serializes_absent_end_as_null() {
    let json = serde_json::to_string(&KnownSection::pending(0x1000)).unwrap();
    assert_eq!(json, r#"{"startAddress":4096,"endAddress":null,"analyzed":false}"#);
}

#[test]
fn result_uses_camel_case_keys() {
    let result = DecompileResult {
        assembly: vec![Assembly { index: 0, parents_start_address: 16, data: "x".into() }],
        ir: vec![Ir { parents_assembly_index: 0, data: "y".into() }],
        decompiled: String::new(),
    };
    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains(r#""parentsStartAddress":16"#));
    assert!(json.contains(r#""parentsAssemblyIndex":0"#));
    assert!(json.contains(r#""decompiled":"""#));
}

#[test]
fn open_sections_do_not_claim_containment() {
    assert!(!KnownSection::pending(0x10).contains(0x10));
    assert!(KnownSection::analyzed(0x10, 0x20).contains(0x1f));
    assert!(!KnownSection::analyzed(0x10, 0x20).contains(0x20));
}

#[test]
fn targets_distinguish_immediates_from_expressions() {
    assert_eq!(Target::from_operand("0x1010"), Target::Direct(0x1010));
    assert_eq!(Target::from_operand("#0x20"), Target::Direct(0x20));
    assert_eq!(Target::from_operand("rax"), Target::Indirect("rax".into()));
}

#[test]
fn ops_encode_with_op_tag() {
    let op = IrOp::CondJump { condition: Condition::Eq, target: Target::Direct(16) };
    let json = op.encode().unwrap();
    assert_eq!(json, r#"{"op":"cond_jump","condition":"eq","target":{"direct":16}}"#);
    assert_eq!(IrOp::decode(&json).unwrap(), op);
    assert_eq!(op.branch_target(), Some(16));
    assert!(!op.ends_flow());
}

#[test]
fn immediates_parse_hex_and_decimal() {
    assert_eq!(parse_immediate("0x10"), Some(16));
    assert_eq!(parse_immediate("42"), Some(42));
    assert_eq!(parse_immediate("-0x8"), Some(8u64.wrapping_neg()));
    assert_eq!(parse_immediate("rbp"), None);
}

#[test]
fn arch_hints_accept_common_aliases() {
    assert_eq!("amd64".parse::<Arch>().unwrap(), Arch::X86_64);
    assert_eq!("AArch64".parse::<Arch>().unwrap(), Arch::Arm64);
    assert_eq!("i386".parse::<Arch>().unwrap(), Arch::X86);
    assert!("mips".parse::<Arch>().is_err());
}

#[test]
fn undecodable_payload_is_tagged() {
    let payload =
        AssemblyPayload::Undecodable { arch: Arch::X86_64, address: 0x2000, bytes: "ff".into() };
    let json = payload.encode().unwrap();
    assert!(json.starts_with(r#"{"kind":"undecodable""#));
    assert_eq!(AssemblyPayload::decode(&json).unwrap(), payload);
    assert_eq!(payload.size(), 1);
}

#[test]
fn decoded_payload_keeps_size_and_hex() {
    let insn = DecodedInstruction::new(Arch::X86_64, 0x1000, &[0xe8, 0, 0, 0, 0], "call", "0x1005");
    assert_eq!(insn.size, 5);
    assert_eq!(insn.bytes, "e800000000");
    assert_eq!(insn.text(), "call 0x1005");
}
