//! Work-list traversal from entry addresses to an `Assembly` sequence.

use std::collections::{HashSet, VecDeque};

use crate::analysis::address_space::{CachedUnit, SharedAddressSpace};
use crate::analysis::report::{CancellationToken, Diagnostic};
use crate::backends::{BinaryLoader, Decoder, Successor};
use crate::error::{DecompileError, DecompileOutcome};
use crate::model::{hex_bytes, Assembly, AssemblyPayload};

/// Output of one traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disassembly {
    pub assembly: Vec<Assembly>,
    pub diagnostics: Vec<Diagnostic>,
    /// Nodes replayed from the index instead of decoded.
    pub reused: usize,
}

/// FIFO of `(address, parent)`; an address is queued at most once.
#[derive(Default)]
struct WorkList {
    queue: VecDeque<(u64, u64)>,
    queued: HashSet<u64>,
}

impl WorkList {
    fn push(&mut self, address: u64, parent: u64) {
        if self.queued.insert(address) {
            self.queue.push_back((address, parent));
        }
    }

    fn pop(&mut self) -> Option<(u64, u64)> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

pub struct Disassembler<'a> {
    loader: &'a dyn BinaryLoader,
    decoder: &'a dyn Decoder,
    index: &'a SharedAddressSpace,
    cancel: &'a CancellationToken,
    max_instructions: Option<usize>,
}

impl<'a> Disassembler<'a> {
    pub fn new(
        loader: &'a dyn BinaryLoader,
        decoder: &'a dyn Decoder,
        index: &'a SharedAddressSpace,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self { loader, decoder, index, cancel, max_instructions: None }
    }

    pub fn max_instructions(mut self, limit: Option<usize>) -> Self {
        self.max_instructions = limit;
        self
    }

    /// Traverse from `entries` in FIFO order.
    ///
    /// Each queued address carries the address that queued it; entries are
    /// their own parents. An address is queued at most once per traversal,
    /// so the first discoverer becomes the parent. Units an earlier request
    /// already decoded are replayed from the index, so the result does not
    /// depend on what the index held before.
    pub fn run(&self, entries: &[u64]) -> DecompileOutcome<Disassembly> {
        let mut out = Disassembly::default();
        let mut work = WorkList::default();

        for &entry in entries {
            work.push(entry, entry);
        }
        self.index.with(|index| {
            for &entry in entries {
                index.extend_pending(entry);
            }
        })?;

        while let Some((address, parent)) = work.pop() {
            if self.cancel.is_cancelled() {
                tracing::info!(address, "traversal cancelled");
                return Err(DecompileError::Cancelled);
            }
            if let Some(limit) = self.max_instructions {
                if out.assembly.len() >= limit {
                    tracing::warn!(limit, pending = work.len() + 1, "instruction budget exhausted");
                    out.diagnostics
                        .push(Diagnostic::BudgetExhausted { limit, pending: work.len() + 1 });
                    break;
                }
            }

            let index = out.assembly.len();
            let cached = self.index.with(|space| {
                let cached = space.cached_unit(address).cloned();
                if let Some(unit) = &cached {
                    for successor in &unit.successors {
                        space.extend_pending(successor.target);
                    }
                }
                cached
            })?;
            if let Some(unit) = cached {
                tracing::debug!(index, address, parent, "replayed from index");
                if AssemblyPayload::decode(&unit.data).is_ok_and(|p| p.is_undecodable()) {
                    out.diagnostics.push(Diagnostic::Undecodable { address });
                }
                out.assembly.push(Assembly { index, parents_start_address: parent, data: unit.data });
                out.reused += 1;
                for successor in unit.successors {
                    work.push(successor.target, address);
                }
                continue;
            }

            let bytes = match self.loader.read_bytes(address, self.decoder.max_instruction_len()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(address, parent, error = %err, "dropping branch");
                    out.diagnostics.push(Diagnostic::OutOfBounds { address, parent });
                    continue;
                }
            };

            match self.decoder.decode(bytes, address) {
                Ok(unit) if unit.length > 0 && unit.length == unit.instruction.size => {
                    let end = address.saturating_add(unit.length);
                    let data = AssemblyPayload::Decoded(unit.instruction).encode()?;
                    let mut successors: Vec<Successor> = unit.successors;
                    successors.sort_by_key(|s| s.kind);
                    let cached = CachedUnit { data: data.clone(), successors: successors.clone() };

                    self.index.with(|space| -> Result<(), DecompileError> {
                        space.record_unit(address, end, cached)?;
                        for successor in &successors {
                            space.extend_pending(successor.target);
                        }
                        Ok(())
                    })??;

                    tracing::debug!(index, address, parent, len = unit.length, "decoded");
                    out.assembly.push(Assembly { index, parents_start_address: parent, data });
                    for successor in successors {
                        work.push(successor.target, address);
                    }
                }
                other => {
                    match &other {
                        Ok(unit) if unit.length > 0 => tracing::warn!(
                            address,
                            length = unit.length,
                            size = unit.instruction.size,
                            "decoder length disagrees with instruction size"
                        ),
                        Ok(_) => tracing::warn!(address, "decoder consumed no bytes"),
                        Err(err) => tracing::warn!(address, error = %err, "undecodable bytes"),
                    }
                    let payload = AssemblyPayload::Undecodable {
                        arch: self.decoder.arch(),
                        address,
                        bytes: hex_bytes(&bytes[..1.min(bytes.len())]),
                    };
                    let data = payload.encode()?;
                    let cached = CachedUnit { data: data.clone(), successors: Vec::new() };
                    self.index
                        .with(|space| space.record_unit(address, address.saturating_add(1), cached))??;
                    out.diagnostics.push(Diagnostic::Undecodable { address });
                    out.assembly.push(Assembly { index, parents_start_address: parent, data });
                }
            }
        }

        tracing::debug!(
            instructions = out.assembly.len(),
            reused = out.reused,
            diagnostics = out.diagnostics.len(),
            "traversal finished"
        );
        Ok(out)
    }
}
