use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::variables::Variable;
use crate::model::{DecompileResult, KnownSection};

/// A failure that was absorbed instead of aborting the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A queued address lies outside every loaded region; that branch of the
    /// traversal was dropped.
    OutOfBounds { address: u64, parent: u64 },
    /// The decoder rejected the bytes; an undecodable node was recorded.
    Undecodable { address: u64 },
    /// No lifting rule matched; an unlifted IR node was recorded.
    Unlifted { assembly_index: usize, reason: String },
    /// The instruction budget ran out with work still queued.
    BudgetExhausted { limit: usize, pending: usize },
}

/// `DecompileResult` plus what the engine learned while producing it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecompileReport {
    pub result: DecompileResult,
    pub diagnostics: Vec<Diagnostic>,
    /// Index sections after the request finished.
    pub sections: Vec<KnownSection>,
    /// Assembly nodes replayed from units an earlier request decoded.
    #[serde(default)]
    pub reused: usize,
    /// Stack variables recovered from the IR.
    #[serde(default)]
    pub variables: Vec<Variable>,
}

/// Cooperative cancellation flag, checked once per work-list iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
