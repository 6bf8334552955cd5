use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::analysis::Diagnostic;

/// Record describing a binary known to the project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinaryRecord {
    /// Human-friendly name, unique within the project.
    pub name: String,
    /// Path to the binary, relative to the project root if possible.
    pub path: String,
    /// Optional architecture string (e.g., "x86_64", "arm64").
    pub arch: Option<String>,
    /// Optional content hash for identity (SHA-256).
    pub hash: Option<String>,
}

impl BinaryRecord {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self { name: name.into(), path: path.into(), arch: None, hash: None }
    }
}

/// Lifecycle of a persisted decompile run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Bookkeeping for one decompile request against a project binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecompileRunRecord {
    /// Row id; `None` until inserted.
    pub id: Option<i64>,
    pub binary: String,
    pub entries: Vec<u64>,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    /// Absorbed failures reported by the engine.
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// Error message when the run failed.
    pub error: Option<String>,
}

impl DecompileRunRecord {
    /// A run that has just started.
    pub fn started(binary: impl Into<String>, entries: Vec<u64>, started_at: impl Into<String>) -> Self {
        Self {
            id: None,
            binary: binary.into(),
            entries,
            status: RunStatus::Running,
            started_at: started_at.into(),
            finished_at: None,
            diagnostics: Vec::new(),
            error: None,
        }
    }
}
