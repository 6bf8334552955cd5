use fireball_core::analysis::assemble;
use fireball_core::error::DecompileError;
use fireball_core::model::{Assembly, Ir};

fn asm(index: usize) -> Assembly {
    Assembly { index, parents_start_address: 0, data: String::new() }
}

fn ir(parent: usize) -> Ir {
    Ir { parents_assembly_index: parent, data: String::new() }
}

#[test]
fn accepts_well_linked_parts() {
    let result = assemble(vec![asm(0), asm(1)], vec![ir(0), ir(0), ir(1)], "x".into()).unwrap();
    assert_eq!(result.assembly.len(), 2);
    assert_eq!(result.decompiled, "x");
}

#[test]
fn rejects_gaps_dangling_parents_and_disorder() {
    assert!(matches!(
        assemble(vec![asm(0), asm(2)], vec![], String::new()),
        Err(DecompileError::InvariantViolation(_))
    ));
    assert!(matches!(
        assemble(vec![asm(0)], vec![ir(1)], String::new()),
        Err(DecompileError::InvariantViolation(_))
    ));
    assert!(matches!(
        assemble(vec![asm(0), asm(1)], vec![ir(1), ir(0)], String::new()),
        Err(DecompileError::InvariantViolation(_))
    ));
}
