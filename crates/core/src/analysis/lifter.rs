use crate::analysis::report::{CancellationToken, Diagnostic};
use crate::backends::LiftingRules;
use crate::error::{DecompileError, DecompileOutcome};
use crate::model::{Assembly, AssemblyPayload, Ir, IrOp};

/// Output of lifting one `Assembly` sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lifted {
    pub ir: Vec<Ir>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lifts assembly nodes in index order through a `LiftingRules` table.
///
/// Nodes that cannot be lifted (undecodable, unparseable payload, or no
/// matching rule) produce a single `IrOp::Unlifted` carrying the raw
/// assembly payload.
pub struct Lifter<'a> {
    rules: &'a dyn LiftingRules,
    cancel: &'a CancellationToken,
}

impl<'a> Lifter<'a> {
    pub fn new(rules: &'a dyn LiftingRules, cancel: &'a CancellationToken) -> Self {
        Self { rules, cancel }
    }

    pub fn lift(&self, assembly: &[Assembly]) -> DecompileOutcome<Lifted> {
        let mut out = Lifted::default();
        for node in assembly {
            if self.cancel.is_cancelled() {
                return Err(DecompileError::Cancelled);
            }
            let ops = match AssemblyPayload::decode(&node.data) {
                Ok(AssemblyPayload::Decoded(insn)) => match self.rules.lift(&insn) {
                    Ok(ops) => ops,
                    Err(err) => {
                        tracing::debug!(index = node.index, error = %err, "unlifted instruction");
                        out.diagnostics.push(Diagnostic::Unlifted {
                            assembly_index: node.index,
                            reason: err.to_string(),
                        });
                        vec![IrOp::Unlifted { raw: node.data.clone() }]
                    }
                },
                Ok(AssemblyPayload::Undecodable { .. }) => {
                    vec![IrOp::Unlifted { raw: node.data.clone() }]
                }
                Err(err) => {
                    tracing::warn!(index = node.index, error = %err, "unreadable assembly payload");
                    out.diagnostics.push(Diagnostic::Unlifted {
                        assembly_index: node.index,
                        reason: format!("unreadable payload: {err}"),
                    });
                    vec![IrOp::Unlifted { raw: node.data.clone() }]
                }
            };
            for op in ops {
                out.ir.push(Ir { parents_assembly_index: node.index, data: op.encode()? });
            }
        }
        Ok(out)
    }
}
