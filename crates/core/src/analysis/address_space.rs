//! Bookkeeping of which byte ranges of the target have been scanned.
//!
//! Two views are kept in step:
//! - `sections`: the public, merged `KnownSection` list, sorted and
//!   non-overlapping. Adjacent analyzed sections are merged.
//! - `units`: every analyzed instruction range exactly as it was marked.
//!   Merging sections loses boundaries, so overlap detection runs against
//!   units instead. A unit recorded by the disassembler also keeps its
//!   encoded payload and successors so a later request can replay it
//!   without decoding again.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::backends::Successor;
use crate::error::{DecompileError, DecompileOutcome, OverlapError};
use crate::model::KnownSection;

/// Answer of `AddressSpaceIndex::lookup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    /// Covered by a closed, analyzed section.
    Analyzed(KnownSection),
    /// Inside the implicit extent of an open section; needs analysis.
    Pending(KnownSection),
    /// Not covered by anything recorded so far.
    Unknown,
}

impl SectionStatus {
    pub fn needs_analysis(&self) -> bool {
        !matches!(self, SectionStatus::Analyzed(_))
    }
}

/// What the decoder produced for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUnit {
    /// Encoded `AssemblyPayload`.
    pub data: String,
    /// Successors in queueing order.
    pub successors: Vec<Successor>,
}

/// One analyzed unit. `cached` is `None` for ranges marked without a decode
/// (or restored from a database written before payloads were stored).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRecord {
    pub start: u64,
    pub end: u64,
    pub cached: Option<CachedUnit>,
}

impl From<(u64, u64)> for UnitRecord {
    fn from((start, end): (u64, u64)) -> Self {
        Self { start, end, cached: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Unit {
    end: u64,
    cached: Option<CachedUnit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSpaceIndex {
    sections: BTreeMap<u64, KnownSection>,
    units: BTreeMap<u64, Unit>,
}

impl AddressSpaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an index from persisted sections and units.
    ///
    /// Sections must be non-overlapping with consistent `analyzed` flags,
    /// units must be non-empty and non-overlapping, and every unit must lie
    /// inside an analyzed section.
    pub fn from_parts<U: Into<UnitRecord>>(
        sections: impl IntoIterator<Item = KnownSection>,
        units: impl IntoIterator<Item = U>,
    ) -> Result<Self, OverlapError> {
        let mut index = Self::new();
        for section in sections {
            match section.end_address {
                Some(end) if section.analyzed && end > section.start_address => {}
                None if !section.analyzed => {}
                _ => {
                    return Err(OverlapError::InvalidRange {
                        start: section.start_address,
                        end: section.end_address.unwrap_or(section.start_address),
                    })
                }
            }
            if index.sections.insert(section.start_address, section).is_some() {
                return Err(OverlapError::Conflict {
                    start: section.start_address,
                    end: section.end_address.unwrap_or(section.start_address),
                    existing_start: section.start_address,
                    existing_end: section.end_address.unwrap_or(section.start_address),
                });
            }
        }

        let mut previous: Option<&KnownSection> = None;
        for section in index.sections.values() {
            if let Some(prev) = previous {
                if let Some(prev_end) = prev.end_address {
                    if prev_end > section.start_address {
                        return Err(OverlapError::Conflict {
                            start: section.start_address,
                            end: section.end_address.unwrap_or(section.start_address),
                            existing_start: prev.start_address,
                            existing_end: prev_end,
                        });
                    }
                }
            }
            previous = Some(section);
        }

        for unit in units {
            let UnitRecord { start, end, cached } = unit.into();
            if start >= end {
                return Err(OverlapError::InvalidRange { start, end });
            }
            if let Some((s, e)) = index.overlapping_unit(start, end) {
                return Err(OverlapError::Conflict { start, end, existing_start: s, existing_end: e });
            }
            match index.section_containing(start) {
                Some(section) if section.analyzed && section.end_address >= Some(end) => {}
                _ => return Err(OverlapError::InvalidRange { start, end }),
            }
            index.units.insert(start, Unit { end, cached });
        }
        Ok(index)
    }

    /// Classify `address`.
    ///
    /// A pending section covers everything from its start up to the next
    /// section's start.
    pub fn lookup(&self, address: u64) -> SectionStatus {
        match self.sections.range(..=address).next_back() {
            Some((_, section)) if section.analyzed => {
                if section.contains(address) {
                    SectionStatus::Analyzed(*section)
                } else {
                    SectionStatus::Unknown
                }
            }
            Some((_, section)) => SectionStatus::Pending(*section),
            None => SectionStatus::Unknown,
        }
    }

    /// Record `[start, end)` as analyzed.
    ///
    /// Re-marking exactly the same range is a no-op. Any other intersection
    /// with a recorded unit means two decodings disagree on instruction
    /// boundaries and is an `OverlapError`. Open sections starting inside
    /// the range are closed into it, and touching analyzed sections merge.
    pub fn mark_analyzed(&mut self, start: u64, end: u64) -> Result<KnownSection, OverlapError> {
        if start >= end {
            return Err(OverlapError::InvalidRange { start, end });
        }
        if self.units.get(&start).is_some_and(|unit| unit.end == end) {
            return self.section_containing(start).ok_or(OverlapError::InvalidRange { start, end });
        }
        if let Some((existing_start, existing_end)) = self.overlapping_unit(start, end) {
            return Err(OverlapError::Conflict { start, end, existing_start, existing_end });
        }
        self.units.insert(start, Unit { end, cached: None });

        let mut merged_start = start;
        let mut merged_end = end;

        // Pending sections starting inside the range are absorbed.
        let absorbed: Vec<u64> = self
            .sections
            .range(start..end)
            .filter(|(_, s)| !s.analyzed)
            .map(|(k, _)| *k)
            .collect();
        for key in absorbed {
            self.sections.remove(&key);
        }

        // Merge with analyzed neighbours that touch or overlap the range.
        loop {
            let left = self
                .sections
                .range(..=merged_start)
                .next_back()
                .filter(|(_, s)| s.analyzed && s.end_address.is_some_and(|e| e >= merged_start))
                .map(|(k, s)| (*k, *s));
            let right = self
                .sections
                .range(merged_start..=merged_end)
                .find(|(_, s)| s.analyzed)
                .map(|(k, s)| (*k, *s));
            let Some((key, section)) = left.or(right) else {
                break;
            };
            self.sections.remove(&key);
            merged_start = merged_start.min(section.start_address);
            merged_end = merged_end.max(section.end_address.unwrap_or(merged_end));
        }

        let section = KnownSection::analyzed(merged_start, merged_end);
        self.sections.insert(merged_start, section);
        Ok(section)
    }

    /// `mark_analyzed` plus the decode that produced the range.
    ///
    /// A unit that already carries a decode keeps the first one.
    pub fn record_unit(
        &mut self,
        start: u64,
        end: u64,
        cached: CachedUnit,
    ) -> Result<KnownSection, OverlapError> {
        let section = self.mark_analyzed(start, end)?;
        if let Some(unit) = self.units.get_mut(&start) {
            unit.cached.get_or_insert(cached);
        }
        Ok(section)
    }

    /// Stored decode of the unit starting at `start`.
    pub fn cached_unit(&self, start: u64) -> Option<&CachedUnit> {
        self.units.get(&start).and_then(|unit| unit.cached.as_ref())
    }

    /// Make sure `address` is covered, opening a pending section if nothing
    /// covers it yet. Returns the covering section.
    pub fn extend_pending(&mut self, address: u64) -> KnownSection {
        match self.lookup(address) {
            SectionStatus::Analyzed(section) | SectionStatus::Pending(section) => section,
            SectionStatus::Unknown => {
                let section = KnownSection::pending(address);
                self.sections.insert(address, section);
                section
            }
        }
    }

    /// Sections in ascending start order.
    pub fn sections(&self) -> Vec<KnownSection> {
        self.sections.values().copied().collect()
    }

    /// Analyzed unit ranges `(start, end)` in ascending order.
    pub fn units(&self) -> Vec<(u64, u64)> {
        self.units.iter().map(|(s, unit)| (*s, unit.end)).collect()
    }

    /// Every unit with its stored decode, in ascending order.
    pub fn unit_records(&self) -> Vec<UnitRecord> {
        self.units
            .iter()
            .map(|(s, unit)| UnitRecord { start: *s, end: unit.end, cached: unit.cached.clone() })
            .collect()
    }

    /// The analyzed unit containing `address`.
    pub fn unit_at(&self, address: u64) -> Option<(u64, u64)> {
        self.units
            .range(..=address)
            .next_back()
            .filter(|(_, unit)| address < unit.end)
            .map(|(s, unit)| (*s, unit.end))
    }

    pub fn is_unit_start(&self, address: u64) -> bool {
        self.units.contains_key(&address)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    fn overlapping_unit(&self, start: u64, end: u64) -> Option<(u64, u64)> {
        self.units
            .range(..end)
            .next_back()
            .filter(|(_, unit)| unit.end > start)
            .map(|(s, unit)| (*s, unit.end))
    }

    fn section_containing(&self, address: u64) -> Option<KnownSection> {
        match self.lookup(address) {
            SectionStatus::Analyzed(section) => Some(section),
            _ => None,
        }
    }
}

/// Address space index shared by concurrent requests.
///
/// Mutation goes through one mutex; callers keep critical sections short
/// and never hold the lock while reading or decoding bytes.
#[derive(Debug, Clone, Default)]
pub struct SharedAddressSpace {
    inner: Arc<Mutex<AddressSpaceIndex>>,
}

impl SharedAddressSpace {
    pub fn new(index: AddressSpaceIndex) -> Self {
        Self { inner: Arc::new(Mutex::new(index)) }
    }

    /// Run `f` with exclusive access to the index.
    pub fn with<T>(&self, f: impl FnOnce(&mut AddressSpaceIndex) -> T) -> DecompileOutcome<T> {
        let mut guard = self.inner.lock().map_err(|_| DecompileError::IndexPoisoned)?;
        Ok(f(&mut guard))
    }

    /// Clone of the current index state.
    pub fn snapshot(&self) -> DecompileOutcome<AddressSpaceIndex> {
        self.with(|index| index.clone())
    }

    pub fn sections(&self) -> DecompileOutcome<Vec<KnownSection>> {
        self.with(|index| index.sections())
    }
}

impl From<AddressSpaceIndex> for SharedAddressSpace {
    fn from(index: AddressSpaceIndex) -> Self {
        Self::new(index)
    }
}
