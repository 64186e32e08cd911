//! Core data models for connection synthesis.
//!
//! Chunks arrive from the document-processing pipeline already carrying their
//! metadata; everything here treats them as read-only. Connections, feedback,
//! and boosts are produced by this crate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SynthesisError;

/// One of the seven detection engines.
///
/// The declaration order is the default tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Semantic,
    ThematicBridge,
    Structural,
    Contradiction,
    Emotional,
    Methodological,
    Temporal,
}

impl EngineKind {
    /// All engines in default priority order.
    pub const ALL: [EngineKind; 7] = [
        EngineKind::Semantic,
        EngineKind::ThematicBridge,
        EngineKind::Structural,
        EngineKind::Contradiction,
        EngineKind::Emotional,
        EngineKind::Methodological,
        EngineKind::Temporal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Semantic => "semantic",
            EngineKind::ThematicBridge => "thematic_bridge",
            EngineKind::Structural => "structural",
            EngineKind::Contradiction => "contradiction",
            EngineKind::Emotional => "emotional",
            EngineKind::Methodological => "methodological",
            EngineKind::Temporal => "temporal",
        }
    }

    /// Engines whose purpose is cross-document discovery. They never connect
    /// a chunk to itself or to another chunk of the same document.
    pub fn cross_document_only(&self) -> bool {
        matches!(
            self,
            EngineKind::Semantic
                | EngineKind::ThematicBridge
                | EngineKind::Structural
                | EngineKind::Contradiction
        )
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = SynthesisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "semantic" => Ok(EngineKind::Semantic),
            "thematic_bridge" | "thematic" => Ok(EngineKind::ThematicBridge),
            "structural" => Ok(EngineKind::Structural),
            "contradiction" => Ok(EngineKind::Contradiction),
            "emotional" => Ok(EngineKind::Emotional),
            "methodological" => Ok(EngineKind::Methodological),
            "temporal" => Ok(EngineKind::Temporal),
            other => Err(SynthesisError::UnknownEngine(other.to_string())),
        }
    }
}

/// A key concept with its extractor-assigned importance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub text: String,
    #[serde(default = "default_concept_importance")]
    pub importance: f64,
}

fn default_concept_importance() -> f64 {
    0.5
}

/// Structured descriptor of a chunk's analytical approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodologySignature {
    /// Named approach, e.g. `"dialectical"` or `"case study"`.
    pub approach: String,
    #[serde(default)]
    pub techniques: Vec<String>,
    #[serde(default)]
    pub evidence_type: Option<String>,
}

/// Narrative-rhythm features of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeRhythm {
    /// Information density in `[0, 1]`.
    pub density: f64,
    /// Forward momentum in `[0, 1]`.
    pub momentum: f64,
    /// Phase label such as `"rising"`, `"climax"`, `"resolution"`.
    #[serde(default)]
    pub phase: Option<String>,
}

/// Precomputed per-chunk metadata. Every field is optional; engines that need
/// a missing field simply produce no candidates for the chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub structural_patterns: Vec<String>,
    #[serde(default)]
    pub emotional_tones: Vec<String>,
    #[serde(default)]
    pub methodology: Option<MethodologySignature>,
    #[serde(default)]
    pub rhythm: Option<NarrativeRhythm>,
    #[serde(default)]
    pub concepts: Vec<Concept>,
    #[serde(default)]
    pub importance: Option<f64>,
    /// Stance polarity in `[-1, 1]` (negative = critical).
    #[serde(default)]
    pub polarity: Option<f64>,
    #[serde(default)]
    pub domain: Option<String>,
}

/// An immutable chunk of one document version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub document_id: String,
    pub version_id: String,
    pub chunk_id: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// A candidate produced by a detector for one source chunk, before the
/// orchestrator tags it with its engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidate {
    pub target_chunk_id: String,
    pub strength: f64,
    pub metadata: serde_json::Value,
}

/// A detector result tagged with its originating engine and source chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConnection {
    pub source_chunk_id: String,
    pub target_chunk_id: String,
    pub engine: EngineKind,
    /// Raw strength in `[0, 1]`.
    pub raw_strength: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A persisted connection. Carries the raw strength only; weighted scores are
/// always recomputed at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub source_chunk_id: String,
    pub target_chunk_id: String,
    pub engine: EngineKind,
    pub raw_strength: f64,
    pub metadata: serde_json::Value,
    /// Document whose detection run produced this connection.
    pub document_id: String,
    /// Version stamp of that document at detection time.
    pub version_id: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub superseded: bool,
}

/// Identifies one detection run over a document version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRun {
    pub id: String,
    pub document_id: String,
    pub version_id: String,
    pub started_at: DateTime<Utc>,
}

impl DetectionRun {
    pub fn new(document_id: &str, version_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            version_id: version_id.to_string(),
            started_at: Utc::now(),
        }
    }
}

/// What a detection run changed in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub stored: usize,
    pub superseded: usize,
}

/// A user validation action against a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Validate,
    Reject,
    Star,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Validate => "validate",
            FeedbackAction::Reject => "reject",
            FeedbackAction::Star => "star",
        }
    }
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackAction {
    type Err = SynthesisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validate" | "accept" => Ok(FeedbackAction::Validate),
            "reject" => Ok(FeedbackAction::Reject),
            "star" => Ok(FeedbackAction::Star),
            other => Err(SynthesisError::UnknownAction(other.to_string())),
        }
    }
}

/// Where and when the user gave feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackContext {
    #[serde(default)]
    pub reading_mode: Option<String>,
    #[serde(default)]
    pub time_of_day: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
}

/// An append-only feedback record. The connection's engine is captured at
/// write time so aggregation never needs to join back to connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub connection_id: String,
    pub engine: EngineKind,
    pub action: FeedbackAction,
    pub context: FeedbackContext,
    pub created_at: DateTime<Utc>,
}

/// A time-bounded multiplier on one engine's weight, created by starring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boost {
    pub engine: EngineKind,
    pub connection_id: String,
    pub multiplier: f64,
    pub expires_at: DateTime<Utc>,
}

impl Boost {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
