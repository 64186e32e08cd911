//! Thematic bridge: chunks that share themes while coming from structurally
//! different domains.
//!
//! Domain difference is `1 − Jaccard(structural patterns)` when both chunks
//! carry structural patterns. Otherwise differing `domain` labels count as
//! full difference and equal labels as none; without either signal the pair
//! is skipped.

use serde_json::json;

use super::{sort_by_strength, EngineThresholds};
use crate::corpus::CorpusIndex;
use crate::models::{ChunkMetadata, ChunkRecord, RawCandidate};
use crate::similarity::{jaccard, overlap};

pub fn detect(
    chunk: &ChunkRecord,
    corpus: &CorpusIndex,
    thresholds: &EngineThresholds,
) -> Vec<RawCandidate> {
    let tags = corpus.tags_for(chunk);
    let (themes, patterns) = (&tags.themes, &tags.structural_patterns);
    if themes.is_empty() || !important_enough(&chunk.metadata, thresholds) {
        return Vec::new();
    }

    let mut candidates: Vec<RawCandidate> = corpus
        .cross_document_tagged(chunk)
        .filter(|(other, _)| important_enough(&other.metadata, thresholds))
        .filter_map(|(other, other_tags)| {
            let other_themes = &other_tags.themes;
            let theme_overlap = jaccard(themes, other_themes);
            if theme_overlap < thresholds.thematic_min_overlap {
                return None;
            }

            let other_patterns = &other_tags.structural_patterns;
            let difference = if patterns.is_empty() || other_patterns.is_empty() {
                label_difference(&chunk.metadata, &other.metadata)?
            } else {
                1.0 - jaccard(patterns, other_patterns)
            };
            if difference < thresholds.thematic_min_domain_difference {
                return None;
            }

            Some(RawCandidate {
                target_chunk_id: other.chunk_id.clone(),
                strength: (theme_overlap + difference) / 2.0,
                metadata: json!({
                    "shared_themes": overlap(themes, other_themes),
                    "theme_overlap": theme_overlap,
                    "domain_difference": difference,
                }),
            })
        })
        .collect();

    sort_by_strength(&mut candidates);
    candidates
}

fn important_enough(metadata: &ChunkMetadata, thresholds: &EngineThresholds) -> bool {
    metadata
        .importance
        .map(|i| i >= thresholds.thematic_min_importance)
        .unwrap_or(true)
}

fn label_difference(a: &ChunkMetadata, b: &ChunkMetadata) -> Option<f64> {
    let a = a.domain.as_deref()?.trim().to_lowercase();
    let b = b.domain.as_deref()?.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some(if a == b { 0.0 } else { 1.0 })
}
