use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fireball_core::analysis::{
    decompile_batch, AddressSpaceIndex, CancellationToken, Decompiler, Diagnostic, SectionStatus,
    SharedAddressSpace,
};
use fireball_core::backends::{
    BinaryLoader, DecodedUnit, Decoder, EdgeKind, MemoryImage, RuleTable, Segment, Successor,
};
use fireball_core::error::{DecodeError, DecompileError, LoadError};
use fireball_core::model::{Arch, AssemblyPayload, DecodedInstruction, IrOp, KnownSection};

/// Decoder driven by a table of `address -> (length, mnemonic, operands, successors)`.
///
/// Addresses missing from the table are invalid encodings.
#[derive(Default)]
struct ScriptedDecoder {
    script: HashMap<u64, (u64, &'static str, &'static str, Vec<Successor>)>,
    calls: AtomicUsize,
    /// Cancel this token once the given number of decodes has happened.
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedDecoder {
    fn insn(mut self, address: u64, length: u64, mnemonic: &'static str, operands: &'static str) -> Self {
        self.script.insert(address, (length, mnemonic, operands, Vec::new()));
        self
    }

    fn edge(mut self, address: u64, target: u64, kind: EdgeKind) -> Self {
        if let Some(entry) = self.script.get_mut(&address) {
            entry.3.push(Successor::new(target, kind));
        }
        self
    }

    fn cancel_after(mut self, decodes: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((decodes, token));
        self
    }
}

impl Decoder for ScriptedDecoder {
    fn decode(&self, bytes: &[u8], address: u64) -> Result<DecodedUnit, DecodeError> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = &self.cancel_after {
            if calls >= *limit {
                token.cancel();
            }
        }
        let (length, mnemonic, operands, successors) =
            self.script.get(&address).ok_or(DecodeError::InvalidEncoding { address })?;
        let raw = &bytes[..(*length as usize).min(bytes.len())];
        Ok(DecodedUnit {
            instruction: DecodedInstruction::new(Arch::X86_64, address, raw, *mnemonic, *operands),
            length: *length,
            successors: successors.clone(),
        })
    }

    fn arch(&self) -> Arch {
        Arch::X86_64
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn image() -> MemoryImage {
    let mut image = MemoryImage::new();
    image.add_segment(Segment::new("text", 0x1000, vec![0x90; 0x100]));
    image.add_segment(Segment::new("more", 0x2000, vec![0xff; 0x10]));
    image.add_segment(Segment::new("far", 0x3000, vec![0x90; 0x10]));
    image
}

fn decompiler(decoder: ScriptedDecoder) -> Decompiler {
    Decompiler::new(image(), decoder, RuleTable::builtin())
}

fn ir_ops(result: &fireball_core::model::DecompileResult) -> Vec<IrOp> {
    result.ir.iter().map(|ir| IrOp::decode(&ir.data).expect("ir payload")).collect()
}

#[test]
fn single_instruction_entry() {
    let d = decompiler(ScriptedDecoder::default().insn(0x1000, 5, "ret", ""));
    let report = d.decompile_with_report(&[0x1000]).expect("decompile");
    let result = &report.result;

    assert_eq!(result.assembly.len(), 1);
    assert_eq!(result.assembly[0].index, 0);
    assert_eq!(result.assembly[0].parents_start_address, 0x1000);
    let payload = AssemblyPayload::decode(&result.assembly[0].data).expect("payload");
    assert_eq!(payload.address(), 0x1000);
    assert_eq!(payload.size(), 5);

    assert_eq!(ir_ops(result), vec![IrOp::Return]);
    assert!(result.ir.iter().all(|ir| ir.parents_assembly_index == 0));
    assert!(result.decompiled.contains("return;"));

    assert_eq!(report.sections, vec![KnownSection::analyzed(0x1000, 0x1005)]);
    assert!(report.diagnostics.is_empty());
}

#[test]
fn jump_target_is_parented_to_the_jump() {
    let d = decompiler(
        ScriptedDecoder::default()
            .insn(0x1000, 2, "jmp", "0x1010")
            .edge(0x1000, 0x1010, EdgeKind::Jump)
            .insn(0x1010, 1, "ret", ""),
    );
    let report = d.decompile_with_report(&[0x1000]).expect("decompile");
    let result = &report.result;

    let parents: Vec<u64> = result.assembly.iter().map(|a| a.parents_start_address).collect();
    assert_eq!(parents, vec![0x1000, 0x1000]);
    let indices: Vec<usize> = result.assembly.iter().map(|a| a.index).collect();
    assert_eq!(indices, vec![0, 1]);

    let ir_parents: Vec<usize> = result.ir.iter().map(|ir| ir.parents_assembly_index).collect();
    assert_eq!(ir_parents, vec![0, 1]);

    assert!(result.decompiled.contains("goto loc_1010;"));
    assert!(result.decompiled.contains("loc_1010:"));
    assert_eq!(
        report.sections,
        vec![KnownSection::analyzed(0x1000, 0x1002), KnownSection::analyzed(0x1010, 0x1011)]
    );
    assert_eq!(d.index().with(|i| i.lookup(0x1011)).unwrap(), SectionStatus::Unknown);
}

#[test]
fn invalid_encoding_becomes_an_unlifted_node() {
    let d = decompiler(ScriptedDecoder::default());
    let report = d.decompile_with_report(&[0x2000]).expect("decompile");
    let result = &report.result;

    assert_eq!(result.assembly.len(), 1);
    let payload = AssemblyPayload::decode(&result.assembly[0].data).expect("payload");
    assert!(payload.is_undecodable());
    assert_eq!(payload.address(), 0x2000);

    assert_eq!(result.ir.len(), 1);
    assert_eq!(result.ir[0].parents_assembly_index, 0);
    assert_eq!(ir_ops(result), vec![IrOp::Unlifted { raw: result.assembly[0].data.clone() }]);
    assert!(result.decompiled.contains("__unlifted("));

    assert_eq!(report.diagnostics, vec![Diagnostic::Undecodable { address: 0x2000 }]);
    assert_eq!(report.sections, vec![KnownSection::analyzed(0x2000, 0x2001)]);
}

#[test]
fn branch_out_of_bounds_is_dropped_with_a_diagnostic() {
    let d = decompiler(
        ScriptedDecoder::default()
            .insn(0x1000, 2, "jmp", "0x9000")
            .edge(0x1000, 0x9000, EdgeKind::Jump),
    );
    let report = d.decompile_with_report(&[0x1000]).expect("decompile");
    assert_eq!(report.result.assembly.len(), 1);
    assert_eq!(report.diagnostics, vec![Diagnostic::OutOfBounds { address: 0x9000, parent: 0x1000 }]);
    assert!(report.result.decompiled.contains("__jump(0x9000);"));
}

#[test]
fn call_and_fallthrough_are_queued_in_edge_order() {
    let d = decompiler(
        ScriptedDecoder::default()
            .insn(0x1000, 5, "call", "0x1020")
            .edge(0x1000, 0x1020, EdgeKind::Call)
            .edge(0x1000, 0x1005, EdgeKind::Fallthrough)
            .insn(0x1005, 1, "ret", "")
            .insn(0x1020, 1, "ret", ""),
    );
    let result = d.decompile(&[0x1000]).expect("decompile");
    let addresses: Vec<u64> = result
        .assembly
        .iter()
        .map(|a| AssemblyPayload::decode(&a.data).expect("payload").address())
        .collect();
    assert_eq!(addresses, vec![0x1000, 0x1005, 0x1020]);
    assert!(result.decompiled.contains("sub_1020();"));
    assert!(result.decompiled.contains("void sub_1020(void)"));
}

#[test]
fn disjoint_requests_run_concurrently_on_one_index() {
    let d = decompiler(
        ScriptedDecoder::default()
            .insn(0x1000, 4, "nop", "")
            .edge(0x1000, 0x1004, EdgeKind::Fallthrough)
            .insn(0x1004, 1, "ret", "")
            .insn(0x3000, 2, "ret", ""),
    );
    let outcomes = decompile_batch(&d, &[vec![0x1000], vec![0x3000]]);
    assert_eq!(outcomes.len(), 2);

    let first = outcomes[0].as_ref().expect("first request");
    let second = outcomes[1].as_ref().expect("second request");
    assert_eq!(first.result.assembly.len(), 2);
    assert_eq!(second.result.assembly.len(), 1);

    let sections = d.index().sections().expect("sections");
    assert_eq!(
        sections,
        vec![KnownSection::analyzed(0x1000, 0x1005), KnownSection::analyzed(0x3000, 0x3002)]
    );
}

#[test]
fn identical_requests_produce_identical_results() {
    let script = || {
        ScriptedDecoder::default()
            .insn(0x1000, 2, "je", "0x1010")
            .edge(0x1000, 0x1010, EdgeKind::ConditionalJump)
            .edge(0x1000, 0x1002, EdgeKind::Fallthrough)
            .insn(0x1002, 3, "mov", "rax, rdi")
            .edge(0x1002, 0x1005, EdgeKind::Fallthrough)
            .insn(0x1005, 1, "ret", "")
            .insn(0x1010, 1, "ret", "")
    };
    let a = decompiler(script()).decompile(&[0x1000]).expect("first");
    let b = decompiler(script()).decompile(&[0x1000]).expect("second");
    assert_eq!(a, b);
    assert!(a.decompiled.contains("if (flags.eq) goto loc_1010;"));
}

#[test]
fn cancelled_request_reports_cancellation() {
    let cancel = CancellationToken::new();
    let d = decompiler(ScriptedDecoder::default().insn(0x1000, 1, "ret", ""))
        .with_cancellation(cancel.clone());
    cancel.cancel();
    assert!(matches!(d.decompile(&[0x1000]), Err(DecompileError::Cancelled)));
}

fn shared_decompiler(decoder: &Arc<ScriptedDecoder>, index: &SharedAddressSpace) -> Decompiler {
    Decompiler::from_shared(Arc::new(image()), decoder.clone(), Arc::new(RuleTable::builtin()))
        .with_index(index.clone())
}

#[test]
fn later_requests_replay_previously_analyzed_units() {
    let decoder = Arc::new(
        ScriptedDecoder::default()
            .insn(0x1000, 2, "nop", "")
            .edge(0x1000, 0x1002, EdgeKind::Fallthrough)
            .insn(0x1002, 1, "ret", ""),
    );
    let index = SharedAddressSpace::default();
    let d = shared_decompiler(&decoder, &index);

    let first = d.decompile_with_report(&[0x1000]).expect("first");
    assert_eq!(first.result.assembly.len(), 2);
    assert_eq!(first.reused, 0);
    assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);

    let second = d.decompile_with_report(&[0x1000]).expect("second");
    assert_eq!(second.result, first.result);
    assert_eq!(second.diagnostics, first.diagnostics);
    assert_eq!(second.reused, 2);
    assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);

    // Replayed nodes take this request's indices and parents.
    let tail = d.decompile(&[0x1002]).expect("tail");
    assert_eq!(tail.assembly.len(), 1);
    assert_eq!(tail.assembly[0].index, 0);
    assert_eq!(tail.assembly[0].parents_start_address, 0x1002);
    assert_eq!(tail.assembly[0].data, first.result.assembly[1].data);
    assert_eq!(ir_ops(&tail), vec![IrOp::Return]);
    assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);

    assert_eq!(index.sections().unwrap(), vec![KnownSection::analyzed(0x1000, 0x1003)]);
}

#[test]
fn replayed_undecodable_units_keep_their_diagnostic() {
    let decoder = Arc::new(
        ScriptedDecoder::default()
            .insn(0x1000, 2, "jmp", "0x2000")
            .edge(0x1000, 0x2000, EdgeKind::Jump),
    );
    let index = SharedAddressSpace::default();
    let d = shared_decompiler(&decoder, &index);

    let first = d.decompile_with_report(&[0x1000]).expect("first");
    let second = d.decompile_with_report(&[0x1000]).expect("second");
    assert_eq!(first.diagnostics, vec![Diagnostic::Undecodable { address: 0x2000 }]);
    assert_eq!(second.diagnostics, first.diagnostics);
    assert_eq!(second.result, first.result);
    assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn ranges_marked_without_a_decode_are_decoded_again() {
    let mut seeded = AddressSpaceIndex::new();
    seeded.mark_analyzed(0x1000, 0x1002).expect("seed");
    let index = SharedAddressSpace::new(seeded);
    let decoder = Arc::new(ScriptedDecoder::default().insn(0x1000, 2, "ret", ""));
    let d = shared_decompiler(&decoder, &index);

    let first = d.decompile_with_report(&[0x1000]).expect("first");
    assert_eq!(first.result.assembly.len(), 1);
    assert_eq!(first.reused, 0);
    assert!(index.with(|i| i.cached_unit(0x1000).is_some()).unwrap());

    let second = d.decompile_with_report(&[0x1000]).expect("second");
    assert_eq!(second.result, first.result);
    assert_eq!(second.reused, 1);
    assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn shared_code_gives_the_same_result_as_an_isolated_run() {
    let script = || {
        ScriptedDecoder::default()
            .insn(0x1000, 5, "call", "0x1020")
            .edge(0x1000, 0x1020, EdgeKind::Call)
            .edge(0x1000, 0x1005, EdgeKind::Fallthrough)
            .insn(0x1005, 1, "ret", "")
            .insn(0x1010, 5, "call", "0x1020")
            .edge(0x1010, 0x1020, EdgeKind::Call)
            .edge(0x1010, 0x1015, EdgeKind::Fallthrough)
            .insn(0x1015, 1, "ret", "")
            .insn(0x1020, 2, "xor", "eax, eax")
            .edge(0x1020, 0x1022, EdgeKind::Fallthrough)
            .insn(0x1022, 1, "ret", "")
    };
    let isolated_a = decompiler(script()).decompile(&[0x1000]).expect("isolated a");
    let isolated_b = decompiler(script()).decompile(&[0x1010]).expect("isolated b");

    let d = decompiler(script());
    let outcomes = decompile_batch(&d, &[vec![0x1000], vec![0x1010]]);
    let batch_a = outcomes[0].as_ref().expect("batch a");
    let batch_b = outcomes[1].as_ref().expect("batch b");
    assert_eq!(batch_a.result, isolated_a);
    assert_eq!(batch_b.result, isolated_b);
}

#[test]
fn cancellation_mid_traversal_keeps_decoded_units() {
    let cancel = CancellationToken::new();
    let chain = || {
        ScriptedDecoder::default()
            .insn(0x1000, 1, "nop", "")
            .edge(0x1000, 0x1001, EdgeKind::Fallthrough)
            .insn(0x1001, 1, "nop", "")
            .edge(0x1001, 0x1002, EdgeKind::Fallthrough)
            .insn(0x1002, 1, "nop", "")
            .edge(0x1002, 0x1003, EdgeKind::Fallthrough)
            .insn(0x1003, 1, "ret", "")
    };
    let decoder = Arc::new(chain().cancel_after(2, cancel.clone()));
    let index = SharedAddressSpace::default();
    let d = shared_decompiler(&decoder, &index).with_cancellation(cancel);

    assert!(matches!(d.decompile(&[0x1000]), Err(DecompileError::Cancelled)));
    assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(index.with(|i| i.units()).unwrap(), vec![(0x1000, 0x1001), (0x1001, 0x1002)]);
    assert_eq!(
        index.sections().unwrap(),
        vec![KnownSection::analyzed(0x1000, 0x1002), KnownSection::pending(0x1002)]
    );

    // A later request on the same index finishes the job and matches a clean run.
    let resumed = Arc::new(chain());
    let result = shared_decompiler(&resumed, &index).decompile(&[0x1000]).expect("resume");
    assert_eq!(resumed.calls.load(Ordering::SeqCst), 2);
    assert_eq!(result, decompiler(chain()).decompile(&[0x1000]).expect("clean"));
}

#[test]
fn length_disagreeing_with_instruction_size_is_undecodable() {
    struct Inconsistent;
    impl Decoder for Inconsistent {
        fn decode(&self, bytes: &[u8], address: u64) -> Result<DecodedUnit, DecodeError> {
            Ok(DecodedUnit {
                instruction: DecodedInstruction::new(Arch::X86_64, address, &bytes[..2], "nop", ""),
                length: 4,
                successors: Vec::new(),
            })
        }
        fn arch(&self) -> Arch {
            Arch::X86_64
        }
        fn name(&self) -> &'static str {
            "inconsistent"
        }
    }
    let d = Decompiler::new(image(), Inconsistent, RuleTable::builtin());
    let report = d.decompile_with_report(&[0x1000]).expect("decompile");
    assert_eq!(report.diagnostics, vec![Diagnostic::Undecodable { address: 0x1000 }]);
    let payload = AssemblyPayload::decode(&report.result.assembly[0].data).expect("payload");
    assert!(payload.is_undecodable());
    assert_eq!(report.sections, vec![KnownSection::analyzed(0x1000, 0x1001)]);
}

#[test]
fn misaligned_decode_is_an_overlap_error() {
    let mut seeded = AddressSpaceIndex::new();
    seeded.mark_analyzed(0x1000, 0x1004).expect("seed");

    let d = decompiler(ScriptedDecoder::default().insn(0x1002, 4, "nop", ""))
        .with_index(SharedAddressSpace::new(seeded));
    assert!(matches!(d.decompile(&[0x1002]), Err(DecompileError::Overlap(_))));
}

#[test]
fn budget_stops_traversal() {
    let d = decompiler(
        ScriptedDecoder::default()
            .insn(0x1000, 1, "nop", "")
            .edge(0x1000, 0x1001, EdgeKind::Fallthrough)
            .insn(0x1001, 1, "nop", "")
            .edge(0x1001, 0x1002, EdgeKind::Fallthrough)
            .insn(0x1002, 1, "ret", ""),
    )
    .max_instructions(Some(2));
    let report = d.decompile_with_report(&[0x1000]).expect("decompile");
    assert_eq!(report.result.assembly.len(), 2);
    assert_eq!(report.diagnostics, vec![Diagnostic::BudgetExhausted { limit: 2, pending: 1 }]);
    assert_eq!(
        d.index().with(|i| i.lookup(0x1002)).unwrap(),
        SectionStatus::Pending(KnownSection::pending(0x1002))
    );
}

#[test]
fn every_ir_node_is_rendered() {
    let d = decompiler(
        ScriptedDecoder::default()
            .insn(0x1000, 3, "push", "rbp")
            .edge(0x1000, 0x1003, EdgeKind::Fallthrough)
            .insn(0x1003, 3, "mov", "rbp, rsp")
            .edge(0x1003, 0x1006, EdgeKind::Fallthrough)
            .insn(0x1006, 2, "vfmadd", "xmm0, xmm1")
            .edge(0x1006, 0x1008, EdgeKind::Fallthrough)
            .insn(0x1008, 1, "leave", "")
            .edge(0x1008, 0x1009, EdgeKind::Fallthrough)
            .insn(0x1009, 1, "ret", ""),
    );
    let result = d.decompile(&[0x1000]).expect("decompile");
    let statements = result
        .decompiled
        .lines()
        .filter(|line| line.starts_with("    ") && !line.trim_start().starts_with("//"))
        .filter(|line| !line.ends_with("*/"))
        .count();
    assert_eq!(statements, result.ir.len());
}

#[test]
fn frame_slots_are_reported_as_variables() {
    let d = decompiler(
        ScriptedDecoder::default()
            .insn(0x1000, 4, "mov", "qword ptr [rbp - 8], rdi")
            .edge(0x1000, 0x1004, EdgeKind::Fallthrough)
            .insn(0x1004, 4, "mov", "rax, qword ptr [rbp - 8]")
            .edge(0x1004, 0x1008, EdgeKind::Fallthrough)
            .insn(0x1008, 1, "ret", ""),
    );
    let report = d.decompile_with_report(&[0x1000]).expect("decompile");

    assert_eq!(report.variables.len(), 1);
    let var = &report.variables[0];
    assert_eq!((var.name.as_str(), var.size, var.reads, var.writes), ("var_8", 8, 1, 1));
    let text = &report.result.decompiled;
    assert!(text.contains("    uint64_t var_8;  /* rbp - 0x8 */"), "{text}");
    assert!(text.contains("    var_8 = rdi;"));
    assert!(text.contains("    rax = var_8;"));
}

#[test]
fn empty_entry_list_is_an_empty_result() {
    let d = decompiler(ScriptedDecoder::default());
    let result = d.decompile(&[]).expect("decompile");
    assert!(result.assembly.is_empty());
    assert!(result.ir.is_empty());
    assert_eq!(result.decompiled, "");
}

#[test]
fn loader_errors_surface_as_out_of_bounds() {
    struct Empty;
    impl BinaryLoader for Empty {
        fn read_bytes(&self, address: u64, _length: usize) -> Result<&[u8], LoadError> {
            Err(LoadError::AddressOutOfBounds { address })
        }
    }
    let d = Decompiler::new(Empty, ScriptedDecoder::default(), RuleTable::builtin());
    let report = d.decompile_with_report(&[0x10]).expect("decompile");
    assert!(report.result.assembly.is_empty());
    assert_eq!(report.diagnostics, vec![Diagnostic::OutOfBounds { address: 0x10, parent: 0x10 }]);
    assert_eq!(report.sections, vec![KnownSection::pending(0x10)]);
}
