//! Connection detection engines.
//!
//! Each engine is a plain function with the [`Detector`] signature: it takes
//! one source chunk plus read access to the corpus index and returns candidate
//! connections with a raw strength in `[0, 1]`. Detectors are pure and
//! deterministic for a fixed corpus snapshot, and never fail on missing or
//! malformed metadata: they return an empty list instead.
//!
//! Engines are registered by tag in an [`EngineRegistry`], so adding or
//! replacing an engine is a registration change.
//!
//! | Engine | Rule | Scope |
//! |--------|------|-------|
//! | [`semantic`] | embedding cosine ≥ 0.3, top 20 | cross-document |
//! | [`thematic`] | theme Jaccard ≥ 0.5 and domain difference ≥ 0.6 | cross-document |
//! | [`structural`] | structural-pattern Jaccard ≥ 0.6 | cross-document |
//! | [`contradiction`] | opposing stance and concept similarity ≥ 0.7 | cross-document |
//! | [`emotional`] | emotional-tone Jaccard > 0 | any other chunk |
//! | [`methodological`] | methodology similarity ≥ 0.3 | any other chunk |
//! | [`temporal`] | rhythm similarity ≥ 0.3 | any other chunk |

pub mod contradiction;
pub mod emotional;
pub mod methodological;
pub mod semantic;
pub mod structural;
pub mod temporal;
pub mod thematic;

use serde::{Deserialize, Serialize};

use crate::corpus::CorpusIndex;
use crate::models::{CandidateConnection, ChunkRecord, EngineKind, RawCandidate};

/// Engine thresholds, decoupled from application config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineThresholds {
    pub semantic_min_strength: f64,
    pub semantic_top_k: usize,
    pub thematic_min_overlap: f64,
    pub thematic_min_domain_difference: f64,
    /// Chunks with a known importance below this are not bridged.
    pub thematic_min_importance: f64,
    pub structural_min_similarity: f64,
    pub contradiction_min_concept_similarity: f64,
    /// Minimum |polarity| on both sides for polarity-based opposition.
    pub contradiction_min_polarity: f64,
    pub methodological_min_similarity: f64,
    pub temporal_min_similarity: f64,
}

impl Default for EngineThresholds {
    fn default() -> Self {
        Self {
            semantic_min_strength: 0.3,
            semantic_top_k: 20,
            thematic_min_overlap: 0.5,
            thematic_min_domain_difference: 0.6,
            thematic_min_importance: 0.6,
            structural_min_similarity: 0.6,
            contradiction_min_concept_similarity: 0.7,
            contradiction_min_polarity: 0.3,
            methodological_min_similarity: 0.3,
            temporal_min_similarity: 0.3,
        }
    }
}

/// Signature shared by every detection engine.
pub type Detector = fn(&ChunkRecord, &CorpusIndex, &EngineThresholds) -> Vec<RawCandidate>;

/// Tag → detector registry.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    detectors: Vec<(EngineKind, Detector)>,
}

impl EngineRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the seven built-in engines in default priority order.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(EngineKind::Semantic, semantic::detect);
        registry.register(EngineKind::ThematicBridge, thematic::detect);
        registry.register(EngineKind::Structural, structural::detect);
        registry.register(EngineKind::Contradiction, contradiction::detect);
        registry.register(EngineKind::Emotional, emotional::detect);
        registry.register(EngineKind::Methodological, methodological::detect);
        registry.register(EngineKind::Temporal, temporal::detect);
        registry
    }

    /// Register a detector, replacing any existing one for the same engine.
    pub fn register(&mut self, engine: EngineKind, detector: Detector) {
        match self.detectors.iter_mut().find(|(kind, _)| *kind == engine) {
            Some(slot) => slot.1 = detector,
            None => self.detectors.push((engine, detector)),
        }
    }

    pub fn unregister(&mut self, engine: EngineKind) {
        self.detectors.retain(|(kind, _)| *kind != engine);
    }

    pub fn get(&self, engine: EngineKind) -> Option<Detector> {
        self.detectors
            .iter()
            .find(|(kind, _)| *kind == engine)
            .map(|(_, d)| *d)
    }

    pub fn engines(&self) -> Vec<EngineKind> {
        self.detectors.iter().map(|(kind, _)| *kind).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

/// Run one detector over a set of source chunks and tag every result with
/// its engine and source chunk.
///
/// Cross-document-only engines are additionally filtered here, so a detector
/// that leaks a same-document or self candidate cannot violate the rule.
pub fn run_detector(
    engine: EngineKind,
    detector: Detector,
    sources: &[ChunkRecord],
    corpus: &CorpusIndex,
    thresholds: &EngineThresholds,
) -> Vec<CandidateConnection> {
    let mut out = Vec::new();
    for source in sources {
        for candidate in detector(source, corpus, thresholds) {
            if candidate.target_chunk_id == source.chunk_id || !candidate.strength.is_finite() {
                continue;
            }
            if engine.cross_document_only() {
                let same_doc = corpus
                    .get(&candidate.target_chunk_id)
                    .map(|t| t.document_id == source.document_id)
                    .unwrap_or(false);
                if same_doc {
                    continue;
                }
            }
            out.push(CandidateConnection {
                source_chunk_id: source.chunk_id.clone(),
                target_chunk_id: candidate.target_chunk_id,
                engine,
                raw_strength: clamp_unit(candidate.strength),
                metadata: candidate.metadata,
            });
        }
    }
    out
}

/// Clamp into `[0, 1]`; non-finite values become `0.0`.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Strength descending, then target id ascending (deterministic).
pub(crate) fn sort_by_strength(candidates: &mut [RawCandidate]) {
    candidates.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.target_chunk_id.cmp(&b.target_chunk_id))
    });
}
