//! Structural isomorphism: chunks in other documents built from the same
//! structural patterns.

use serde_json::json;

use super::{sort_by_strength, EngineThresholds};
use crate::corpus::CorpusIndex;
use crate::models::{ChunkRecord, RawCandidate};
use crate::similarity::{jaccard, overlap};

pub fn detect(
    chunk: &ChunkRecord,
    corpus: &CorpusIndex,
    thresholds: &EngineThresholds,
) -> Vec<RawCandidate> {
    let patterns = corpus.tags_for(chunk).structural_patterns;
    if patterns.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<RawCandidate> = corpus
        .cross_document_tagged(chunk)
        .filter_map(|(other, other_tags)| {
            let other_patterns = &other_tags.structural_patterns;
            let similarity = jaccard(&patterns, other_patterns);
            if similarity < thresholds.structural_min_similarity {
                return None;
            }
            Some(RawCandidate {
                target_chunk_id: other.chunk_id.clone(),
                strength: similarity,
                metadata: json!({ "shared_patterns": overlap(&patterns, other_patterns) }),
            })
        })
        .collect();

    sort_by_strength(&mut candidates);
    candidates
}
