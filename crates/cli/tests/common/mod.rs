#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use object::write::{Object, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};

/// `zero` at 0x0: push rbp; mov rbp, rsp; xor eax, eax; pop rbp; ret
/// `one` at 0x10: mov eax, 1; ret
pub fn write_elf_fixture(dir: &Path) -> PathBuf {
    let mut code = vec![0x55, 0x48, 0x89, 0xe5, 0x31, 0xc0, 0x5d, 0xc3];
    code.resize(0x10, 0x90);
    code.extend_from_slice(&[0xb8, 0x01, 0x00, 0x00, 0x00, 0xc3]);

    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text_id = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    obj.section_mut(text_id).set_data(code, 16);
    for (name, value, size) in [("zero", 0u64, 8u64), ("one", 0x10, 6)] {
        obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text_id),
            flags: SymbolFlags::Elf { st_info: 0x12, st_other: 0 },
        });
    }

    let path = dir.join("fixture.o");
    std::fs::write(&path, obj.write().expect("write elf")).expect("write fixture");
    path
}

/// Initialize a project at `root` and register the ELF fixture as `fixture`.
pub fn init_project_with_fixture(root: &Path) {
    cargo_bin_cmd!("fireball")
        .args(["init-project", "--name", "Fixture", "--root"])
        .arg(root)
        .assert()
        .success();
    let bin = write_elf_fixture(root);
    cargo_bin_cmd!("fireball")
        .args(["add-binary", "--name", "fixture", "--root"])
        .arg(root)
        .arg("--path")
        .arg(&bin)
        .assert()
        .success()
        .stdout(predicates::str::contains("Arch: x86_64"))
        .stdout(predicates::str::contains("Symbols: 2"));
}
