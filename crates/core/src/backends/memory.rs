use std::collections::BTreeMap;

use crate::backends::BinaryLoader;
use crate::error::LoadError;
use crate::model::Arch;

/// One mapped region: bytes placed at a virtual base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub base: u64,
    pub bytes: Vec<u8>,
}

impl Segment {
    pub fn new(name: impl Into<String>, base: u64, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), base, bytes }
    }

    /// Exclusive end address.
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.bytes.len() as u64)
    }

    fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }
}

/// In-memory image made of non-overlapping segments.
///
/// Used directly for raw blobs and as the backing store of parsed object
/// files. Segments that touch are coalesced so a read never stops at a
/// boundary between two mapped ranges.
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    segments: Vec<Segment>,
    arch: Option<Arch>,
    entry_point: Option<u64>,
    symbols: BTreeMap<String, u64>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single flat segment starting at `base`.
    pub fn flat(base: u64, bytes: Vec<u8>) -> Self {
        let mut image = Self::new();
        image.add_segment(Segment::new("flat", base, bytes));
        image
    }

    /// Add a segment, keeping segments sorted by base. Empty segments and
    /// segments overlapping an existing one are ignored; a segment starting
    /// or ending exactly at a neighbour is merged into it, keeping the lower
    /// segment's name.
    pub fn add_segment(&mut self, segment: Segment) -> &mut Self {
        if segment.bytes.is_empty() {
            return self;
        }
        let overlaps = self
            .segments
            .iter()
            .any(|s| segment.base < s.end() && s.base < segment.end());
        if overlaps {
            tracing::warn!(
                name = %segment.name,
                base = segment.base,
                "skipping segment overlapping an existing mapping"
            );
            return self;
        }
        let mut pos = self.segments.partition_point(|s| s.base < segment.base);
        match pos.checked_sub(1) {
            Some(prev) if self.segments[prev].end() == segment.base => {
                tracing::debug!(
                    name = %segment.name,
                    into = %self.segments[prev].name,
                    "coalescing segment"
                );
                self.segments[prev].bytes.extend_from_slice(&segment.bytes);
                pos = prev;
            }
            _ => self.segments.insert(pos, segment),
        }
        if pos + 1 < self.segments.len() && self.segments[pos].end() == self.segments[pos + 1].base {
            let next = self.segments.remove(pos + 1);
            tracing::debug!(name = %next.name, into = %self.segments[pos].name, "coalescing segment");
            self.segments[pos].bytes.extend(next.bytes);
        }
        self
    }

    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn with_entry_point(mut self, entry: u64) -> Self {
        self.entry_point = Some(entry);
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Name an address; the first definition of a name wins.
    pub fn add_symbol(&mut self, name: impl Into<String>, address: u64) -> &mut Self {
        self.symbols.entry(name.into()).or_insert(address);
        self
    }

    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    /// All named addresses, ordered by name.
    pub fn symbols(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.symbols.iter().map(|(name, address)| (name.as_str(), *address))
    }

    fn segment_for(&self, address: u64) -> Option<&Segment> {
        let pos = self.segments.partition_point(|s| s.base <= address);
        if pos == 0 {
            return None;
        }
        let candidate = &self.segments[pos - 1];
        candidate.contains(address).then_some(candidate)
    }
}

impl BinaryLoader for MemoryImage {
    fn read_bytes(&self, address: u64, length: usize) -> Result<&[u8], LoadError> {
        let segment =
            self.segment_for(address).ok_or(LoadError::AddressOutOfBounds { address })?;
        let offset = (address - segment.base) as usize;
        let end = offset.saturating_add(length.max(1)).min(segment.bytes.len());
        Ok(&segment.bytes[offset..end])
    }

    fn arch(&self) -> Option<Arch> {
        self.arch
    }

    fn entry_point(&self) -> Option<u64> {
        self.entry_point
    }
}
