use goblin::{elf, mach, pe, Object};

use crate::backends::{MemoryImage, Segment};
use crate::error::DecompileError;
use crate::model::Arch;

#[derive(Debug, Clone)]
struct SectionRange {
    name: String,
    start: u64,
    file_offset: usize,
    size: usize,
    executable: bool,
}

fn arch_from_object(obj: &Object) -> Option<Arch> {
    match obj {
        Object::Elf(elf) => match elf.header.e_machine {
            elf::header::EM_X86_64 => Some(Arch::X86_64),
            elf::header::EM_386 => Some(Arch::X86),
            elf::header::EM_AARCH64 => Some(Arch::Arm64),
            elf::header::EM_ARM => Some(Arch::Arm),
            _ => None,
        },
        Object::PE(pe) => match pe.header.coff_header.machine {
            pe::header::COFF_MACHINE_X86 => Some(Arch::X86),
            pe::header::COFF_MACHINE_X86_64 => Some(Arch::X86_64),
            pe::header::COFF_MACHINE_ARM => Some(Arch::Arm),
            pe::header::COFF_MACHINE_ARM64 => Some(Arch::Arm64),
            _ => None,
        },
        Object::Mach(mach::Mach::Binary(bin)) => match bin.header.cputype() {
            mach::cputype::CPU_TYPE_X86 => Some(Arch::X86),
            mach::cputype::CPU_TYPE_X86_64 => Some(Arch::X86_64),
            mach::cputype::CPU_TYPE_ARM => Some(Arch::Arm),
            mach::cputype::CPU_TYPE_ARM64 => Some(Arch::Arm64),
            _ => None,
        },
        _ => None,
    }
}

fn collect_sections(obj: &Object) -> Vec<SectionRange> {
    match obj {
        Object::Elf(elf) => elf
            .section_headers
            .iter()
            .filter(|sh| {
                sh.sh_type != elf::section_header::SHT_NOBITS
                    && sh.sh_flags & u64::from(elf::section_header::SHF_ALLOC) != 0
            })
            .map(|sh| SectionRange {
                name: elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string(),
                start: sh.sh_addr,
                file_offset: sh.sh_offset as usize,
                size: sh.sh_size as usize,
                executable: sh.sh_flags & u64::from(elf::section_header::SHF_EXECINSTR) != 0,
            })
            .collect(),
        Object::PE(pe) => pe
            .sections
            .iter()
            .map(|sec| {
                let raw = sec.size_of_raw_data as usize;
                let size = if sec.virtual_size == 0 { raw } else { raw.min(sec.virtual_size as usize) };
                SectionRange {
                    name: sec.name().unwrap_or_default().to_string(),
                    start: pe.image_base as u64 + sec.virtual_address as u64,
                    file_offset: sec.pointer_to_raw_data as usize,
                    size,
                    executable: sec.characteristics
                        & pe::section_table::IMAGE_SCN_MEM_EXECUTE
                        != 0,
                }
            })
            .collect(),
        Object::Mach(mach::Mach::Binary(bin)) => bin
            .segments
            .sections()
            .flatten()
            .filter_map(|res| res.ok())
            .map(|(sec, _)| {
                let name = sec.name().unwrap_or("").to_string();
                SectionRange {
                    executable: name == "__text" || name == "__stubs",
                    name,
                    start: sec.addr,
                    file_offset: sec.offset as usize,
                    size: sec.size as usize,
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn entry_point(obj: &Object) -> Option<u64> {
    match obj {
        Object::Elf(elf) if elf.header.e_entry != 0 => Some(elf.header.e_entry),
        Object::PE(pe) if pe.entry != 0 => Some(pe.image_base as u64 + pe.entry as u64),
        Object::Mach(mach::Mach::Binary(bin)) if bin.entry != 0 => Some(bin.entry),
        _ => None,
    }
}

/// Defined function symbols (ELF), exports (PE) and defined symbols (Mach-O).
fn collect_symbols(obj: &Object) -> Vec<(String, u64)> {
    match obj {
        Object::Elf(elf) => {
            let tables = [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)];
            tables
                .into_iter()
                .flat_map(|(syms, strtab)| {
                    syms.iter()
                        .filter(|sym| sym.is_function() && sym.st_shndx != 0)
                        .filter_map(move |sym| {
                            let name = strtab.get_at(sym.st_name)?;
                            (!name.is_empty()).then(|| (name.to_string(), sym.st_value))
                        })
                })
                .collect()
        }
        Object::PE(pe) => pe
            .exports
            .iter()
            .filter_map(|export| {
                Some((export.name?.to_string(), pe.image_base as u64 + export.rva as u64))
            })
            .collect(),
        Object::Mach(mach::Mach::Binary(bin)) => bin
            .symbols()
            .filter_map(|res| res.ok())
            .filter(|(name, nlist)| !name.is_empty() && !nlist.is_stab() && !nlist.is_undefined())
            .map(|(name, nlist)| (name.to_string(), nlist.n_value))
            .collect(),
        _ => Vec::new(),
    }
}

/// Parse an ELF, PE or Mach-O file into a `MemoryImage`.
///
/// Executable sections are mapped first so they win when a relocatable
/// object places several sections at the same address.
pub fn load_object_image(bytes: &[u8]) -> Result<MemoryImage, DecompileError> {
    let obj = Object::parse(bytes)
        .map_err(|e| DecompileError::Backend(format!("failed to parse object file: {e}")))?;
    if matches!(obj, Object::Unknown(_)) {
        return Err(DecompileError::Backend("unrecognized object file format".into()));
    }

    let mut sections = collect_sections(&obj);
    sections.sort_by_key(|s| (!s.executable, s.start));

    let mut image = MemoryImage::new();
    for sec in sections {
        let Some(data) = bytes.get(sec.file_offset..sec.file_offset.saturating_add(sec.size))
        else {
            tracing::warn!(section = %sec.name, "section data lies outside the file; skipping");
            continue;
        };
        image.add_segment(Segment::new(sec.name, sec.start, data.to_vec()));
    }

    let mut image = match arch_from_object(&obj) {
        Some(arch) => image.with_arch(arch),
        None => image,
    };
    if let Some(entry) = entry_point(&obj) {
        image = image.with_entry_point(entry);
    }
    for (name, address) in collect_symbols(&obj) {
        image.add_symbol(name, address);
    }
    tracing::debug!(segments = image.segments().len(), "loaded object image");
    Ok(image)
}
