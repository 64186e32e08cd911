//! Emotional resonance: any shared emotional tone, within or across documents.

use serde_json::json;

use super::{sort_by_strength, EngineThresholds};
use crate::corpus::CorpusIndex;
use crate::models::{ChunkRecord, RawCandidate};
use crate::similarity::{jaccard, overlap};

pub fn detect(
    chunk: &ChunkRecord,
    corpus: &CorpusIndex,
    _thresholds: &EngineThresholds,
) -> Vec<RawCandidate> {
    let tones = corpus.tags_for(chunk).emotional_tones;
    if tones.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<RawCandidate> = corpus
        .others_tagged(chunk)
        .filter_map(|(other, other_tags)| {
            let other_tones = &other_tags.emotional_tones;
            let similarity = jaccard(&tones, other_tones);
            if similarity <= 0.0 {
                return None;
            }
            Some(RawCandidate {
                target_chunk_id: other.chunk_id.clone(),
                strength: similarity,
                metadata: json!({ "shared_tones": overlap(&tones, other_tones) }),
            })
        })
        .collect();

    sort_by_strength(&mut candidates);
    candidates
}
