//! Typed errors for the synthesis pipeline.
//!
//! Engine errors are never fatal to a detection run: the orchestrator
//! records them and carries on with the remaining engines. Everything in
//! [`SynthesisError`] is surfaced to the caller.

use crate::models::EngineKind;

/// Failure of a single engine during a detection run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("engine {engine} timed out after {after_ms}ms")]
    TimedOut { engine: EngineKind, after_ms: u64 },

    #[error("engine {engine} failed: {reason}")]
    Failed { engine: EngineKind, reason: String },
}

impl EngineError {
    pub fn engine(&self) -> EngineKind {
        match self {
            EngineError::TimedOut { engine, .. } | EngineError::Failed { engine, .. } => *engine,
        }
    }
}

/// Errors returned to callers of the synthesis entry points.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SynthesisError {
    #[error("detection for document {document_id} version {version_id} timed out after {after_ms}ms")]
    DetectionTimedOut {
        document_id: String,
        version_id: String,
        after_ms: u64,
    },

    #[error("no chunks found for document {document_id} version {version_id}")]
    NoChunks {
        document_id: String,
        version_id: String,
    },

    #[error("document {document_id} version {version_id} already imported")]
    VersionExists {
        document_id: String,
        version_id: String,
    },

    /// Chunk ids identify a chunk across the whole library, so a new
    /// document may not reuse one already owned by another document.
    #[error("chunk id {chunk_id} already belongs to document {owner}")]
    ChunkIdTaken { chunk_id: String, owner: String },

    #[error("connection not found: {0}")]
    UnknownConnection(String),

    #[error("unknown engine: '{0}'")]
    UnknownEngine(String),

    #[error("unknown feedback action: '{0}' (expected validate, reject, or star)")]
    UnknownAction(String),

    #[error("invalid weight {weight} for engine {engine}: must be in [0.1, 1.0]")]
    InvalidWeight { engine: EngineKind, weight: f64 },

    #[error("invalid limits: {0}")]
    InvalidLimits(String),

    #[error("invalid priority order: {0}")]
    InvalidPriority(String),
}
