#![cfg(feature = "capstone-decoder")]

use fireball_core::backends::{capstone_version, CapstoneDecoder, Decoder, EdgeKind, Successor};
use fireball_core::error::DecodeError;
use fireball_core::model::Arch;

#[test]
fn decodes_call_with_fallthrough_then_target() {
    let decoder = CapstoneDecoder::new(Arch::X86_64).unwrap();
    // call 0x1010
    let unit = decoder.decode(&[0xe8, 0x0b, 0x00, 0x00, 0x00], 0x1000).unwrap();
    assert_eq!(unit.length, 5);
    assert_eq!(unit.instruction.mnemonic, "call");
    assert_eq!(
        unit.successors,
        vec![
            Successor::new(0x1005, EdgeKind::Fallthrough),
            Successor::new(0x1010, EdgeKind::Call)
        ]
    );
}

#[test]
fn ret_has_no_successors() {
    let decoder = CapstoneDecoder::new(Arch::X86_64).unwrap();
    let unit = decoder.decode(&[0xc3], 0x2000).unwrap();
    assert_eq!(unit.instruction.mnemonic, "ret");
    assert!(unit.successors.is_empty());
}

#[test]
fn truncated_bytes_are_invalid_encoding() {
    let decoder = CapstoneDecoder::new(Arch::X86_64).unwrap();
    let err = decoder.decode(&[0x48], 0x3000).unwrap_err();
    assert_eq!(err, DecodeError::InvalidEncoding { address: 0x3000 });
}

#[test]
fn reports_linked_library_version() {
    let version = capstone_version();
    assert!(version.split('.').all(|part| part.parse::<u32>().is_ok()), "{version}");
}
