//! The decompilation pipeline.
//!
//! Stages run in a fixed order over exclusively owned buffers:
//! - `disassembler`: work-list traversal from entry addresses, recording
//!   analyzed ranges in the shared `address_space` index.
//! - `lifter`: assembly to IR through a lifting rule table.
//! - `variables`: stack slot accesses in the IR, named and typed.
//! - `renderer`: IR back into block-structured pseudocode.
//! - `result`: composes and re-validates the final `DecompileResult`.
//!
//! `Decompiler` ties the stages to a set of collaborators and one index.

pub mod address_space;
pub mod disassembler;
pub mod lifter;
pub mod renderer;
pub mod report;
pub mod result;
pub mod variables;

use std::sync::Arc;

use rayon::prelude::*;

pub use address_space::{
    AddressSpaceIndex, CachedUnit, SectionStatus, SharedAddressSpace, UnitRecord,
};
pub use disassembler::{Disassembler, Disassembly};
pub use lifter::{Lifted, Lifter};
pub use renderer::{render, render_with_variables};
pub use report::{CancellationToken, DecompileReport, Diagnostic};
pub use result::assemble;
pub use variables::{DataAccess, Variable, Variables};

use crate::backends::{BinaryLoader, Decoder, LiftingRules};
use crate::error::DecompileOutcome;
use crate::model::DecompileResult;

/// Entry point of the engine: collaborators plus the index they update.
///
/// Cloning is cheap and clones share the same index and cancellation flag.
#[derive(Clone)]
pub struct Decompiler {
    loader: Arc<dyn BinaryLoader>,
    decoder: Arc<dyn Decoder>,
    rules: Arc<dyn LiftingRules>,
    index: SharedAddressSpace,
    cancel: CancellationToken,
    max_instructions: Option<usize>,
}

impl Decompiler {
    /// A decompiler with a fresh private index.
    pub fn new<L, D, R>(loader: L, decoder: D, rules: R) -> Self
    where
        L: BinaryLoader + 'static,
        D: Decoder + 'static,
        R: LiftingRules + 'static,
    {
        Self::from_shared(Arc::new(loader), Arc::new(decoder), Arc::new(rules))
    }

    pub fn from_shared(
        loader: Arc<dyn BinaryLoader>,
        decoder: Arc<dyn Decoder>,
        rules: Arc<dyn LiftingRules>,
    ) -> Self {
        Self {
            loader,
            decoder,
            rules,
            index: SharedAddressSpace::default(),
            cancel: CancellationToken::new(),
            max_instructions: None,
        }
    }

    /// Use `index` instead of a private one, e.g. to share it between
    /// decompilers or to resume from a persisted state.
    pub fn with_index(mut self, index: SharedAddressSpace) -> Self {
        self.index = index;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stop traversal after `limit` instructions per request.
    pub fn max_instructions(mut self, limit: Option<usize>) -> Self {
        self.max_instructions = limit;
        self
    }

    pub fn index(&self) -> &SharedAddressSpace {
        &self.index
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn decompile(&self, entries: &[u64]) -> DecompileOutcome<DecompileResult> {
        self.decompile_with_report(entries).map(|report| report.result)
    }

    /// Run the full pipeline for `entries` and keep the diagnostics.
    pub fn decompile_with_report(&self, entries: &[u64]) -> DecompileOutcome<DecompileReport> {
        tracing::info!(
            entries = ?entries.iter().map(|e| format!("0x{e:x}")).collect::<Vec<_>>(),
            decoder = self.decoder.name(),
            "decompiling"
        );

        let disassembly =
            Disassembler::new(self.loader.as_ref(), self.decoder.as_ref(), &self.index, &self.cancel)
                .max_instructions(self.max_instructions)
                .run(entries)?;
        let lifted = Lifter::new(self.rules.as_ref(), &self.cancel).lift(&disassembly.assembly)?;
        let variables = Variables::analyze(&lifted.ir);
        let decompiled = render_with_variables(&disassembly.assembly, &lifted.ir, &variables);
        let result = assemble(disassembly.assembly, lifted.ir, decompiled)?;

        let reused = disassembly.reused;
        let mut diagnostics = disassembly.diagnostics;
        diagnostics.extend(lifted.diagnostics);
        let sections = self.index.sections()?;

        tracing::info!(
            assembly = result.assembly.len(),
            ir = result.ir.len(),
            reused,
            diagnostics = diagnostics.len(),
            "decompiled"
        );
        Ok(DecompileReport {
            result,
            diagnostics,
            sections,
            reused,
            variables: variables.into_variables(),
        })
    }
}

/// Run independent entry sets concurrently over the decompiler's shared
/// index. Results come back in request order.
pub fn decompile_batch(
    decompiler: &Decompiler,
    requests: &[Vec<u64>],
) -> Vec<DecompileOutcome<DecompileReport>> {
    requests.par_iter().map(|entries| decompiler.decompile_with_report(entries)).collect()
}
