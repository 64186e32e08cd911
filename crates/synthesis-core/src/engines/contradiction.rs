//! Contradiction: same topic, opposite stance.
//!
//! A pair is opposed when the chunks carry an opposite-tone pair from
//! [`OPPOSITE_TONES`], or, failing that, stance polarities of opposite sign
//! that are each strong enough. The topic test is concept similarity: an
//! importance-weighted Jaccard over extracted concepts, falling back to
//! embedding cosine when either side has no concepts.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use super::{clamp_unit, sort_by_strength, EngineThresholds};
use crate::corpus::CorpusIndex;
use crate::models::{ChunkMetadata, ChunkRecord, Concept, RawCandidate};
use crate::similarity::cosine_similarity;

/// Symmetric table of opposing emotional tones.
pub const OPPOSITE_TONES: &[(&str, &str)] = &[
    ("critical", "affirmative"),
    ("critical", "affirming"),
    ("skeptical", "affirming"),
    ("skeptical", "convinced"),
    ("pessimistic", "optimistic"),
    ("hopeful", "despairing"),
    ("hopeful", "ominous"),
    ("melancholic", "triumphant"),
    ("concerned", "reassuring"),
    ("tense", "calm"),
];

pub fn are_opposed(a: &str, b: &str) -> bool {
    OPPOSITE_TONES
        .iter()
        .any(|(x, y)| (*x == a && *y == b) || (*x == b && *y == a))
}

pub fn detect(
    chunk: &ChunkRecord,
    corpus: &CorpusIndex,
    thresholds: &EngineThresholds,
) -> Vec<RawCandidate> {
    let source = &chunk.metadata;
    if source.emotional_tones.is_empty() && source.polarity.is_none() {
        return Vec::new();
    }

    let tones = corpus.tags_for(chunk).emotional_tones;

    let mut candidates: Vec<RawCandidate> = corpus
        .cross_document_tagged(chunk)
        .filter_map(|(other, other_tags)| {
            let stance = opposition(
                (source, &tones),
                (&other.metadata, &other_tags.emotional_tones),
                thresholds,
            )?;
            let (similarity, basis) = concept_similarity(source, &other.metadata)?;
            if similarity < thresholds.contradiction_min_concept_similarity {
                return None;
            }
            Some(RawCandidate {
                target_chunk_id: other.chunk_id.clone(),
                strength: clamp_unit(similarity),
                metadata: json!({
                    "stance": stance,
                    "concept_similarity": similarity,
                    "basis": basis,
                }),
            })
        })
        .collect();

    sort_by_strength(&mut candidates);
    candidates
}

/// Describe the opposing stance, if there is one.
fn opposition(
    (a, tones_a): (&ChunkMetadata, &BTreeSet<String>),
    (b, tones_b): (&ChunkMetadata, &BTreeSet<String>),
    thresholds: &EngineThresholds,
) -> Option<Value> {
    for ta in tones_a {
        for tb in tones_b {
            if are_opposed(ta, tb) {
                return Some(json!({ "tone_pair": [ta, tb] }));
            }
        }
    }

    let (pa, pb) = (a.polarity?, b.polarity?);
    let min = thresholds.contradiction_min_polarity;
    if pa.is_finite() && pb.is_finite() && pa * pb < 0.0 && pa.abs() >= min && pb.abs() >= min {
        return Some(json!({ "polarity": [pa, pb] }));
    }
    None
}

/// Concept similarity and the signal it was computed from.
fn concept_similarity(a: &ChunkMetadata, b: &ChunkMetadata) -> Option<(f64, &'static str)> {
    if !a.concepts.is_empty() && !b.concepts.is_empty() {
        return Some((weighted_concept_overlap(&a.concepts, &b.concepts), "concepts"));
    }
    let (va, vb) = (a.embedding.as_deref()?, b.embedding.as_deref()?);
    if va.is_empty() || vb.is_empty() {
        return None;
    }
    Some((cosine_similarity(va, vb) as f64, "embedding"))
}

/// Weighted Jaccard: Σ min(wa, wb) / Σ max(wa, wb) over the concept union.
fn weighted_concept_overlap(a: &[Concept], b: &[Concept]) -> f64 {
    let weights = |concepts: &[Concept]| {
        let mut map: BTreeMap<String, f64> = BTreeMap::new();
        for c in concepts {
            let key = c.text.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            let w = clamp_unit(c.importance);
            let entry = map.entry(key).or_insert(0.0);
            *entry = entry.max(w);
        }
        map
    };
    let (wa, wb) = (weights(a), weights(b));

    let mut min_sum = 0.0;
    let mut max_sum = 0.0;
    for (key, &x) in &wa {
        let y = wb.get(key).copied().unwrap_or(0.0);
        min_sum += x.min(y);
        max_sum += x.max(y);
    }
    for (key, &y) in &wb {
        if !wa.contains_key(key) {
            max_sum += y;
        }
    }
    if max_sum <= f64::EPSILON {
        0.0
    } else {
        min_sum / max_sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::fixtures::{chunk, tags};

    fn concepts(items: &[(&str, f64)]) -> Vec<Concept> {
        items
            .iter()
            .map(|(t, w)| Concept {
                text: t.to_string(),
                importance: *w,
            })
            .collect()
    }

    fn stance(tones: &[&str], items: &[(&str, f64)]) -> ChunkMetadata {
        ChunkMetadata {
            emotional_tones: tags(tones),
            concepts: concepts(items),
            ..Default::default()
        }
    }

    #[test]
    fn test_opposite_tones_same_concepts() {
        let topic = [("free will", 0.9), ("determinism", 0.8)];
        let corpus = CorpusIndex::new(vec![
            chunk("d1", "a", stance(&["critical"], &topic)),
            chunk("d2", "b", stance(&["affirmative"], &topic)),
            chunk("d3", "c", stance(&["critical"], &topic)),
            chunk("d4", "d", stance(&["affirmative"], &[("gardening", 0.9)])),
        ]);
        let result = detect(corpus.get("a").unwrap(), &corpus, &EngineThresholds::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].target_chunk_id, "b");
        assert!((result[0].strength - 1.0).abs() < 1e-9);
        assert_eq!(result[0].metadata["stance"]["tone_pair"], json!(["critical", "affirmative"]));
    }

    #[test]
    fn test_polarity_fallback_with_embeddings() {
        let a = ChunkMetadata {
            polarity: Some(-0.6),
            embedding: Some(vec![1.0, 0.1]),
            ..Default::default()
        };
        let b = ChunkMetadata {
            polarity: Some(0.7),
            embedding: Some(vec![1.0, 0.0]),
            ..Default::default()
        };
        let weak = ChunkMetadata {
            polarity: Some(0.1),
            embedding: Some(vec![1.0, 0.0]),
            ..Default::default()
        };
        let corpus = CorpusIndex::new(vec![
            chunk("d1", "a", a),
            chunk("d2", "b", b),
            chunk("d3", "w", weak),
        ]);
        let result = detect(corpus.get("a").unwrap(), &corpus, &EngineThresholds::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].target_chunk_id, "b");
        assert_eq!(result[0].metadata["basis"], "embedding");
    }

    #[test]
    fn test_weighted_overlap_partial() {
        let a = concepts(&[("justice", 1.0), ("law", 0.5)]);
        let b = concepts(&[("Justice", 0.5), ("mercy", 0.5)]);
        // min: 0.5 ; max: 1.0 + 0.5 + 0.5
        assert!((weighted_concept_overlap(&a, &b) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_no_stance_metadata_no_candidates() {
        let corpus = CorpusIndex::new(vec![
            chunk("d1", "a", ChunkMetadata::default()),
            chunk("d2", "b", stance(&["affirmative"], &[("x", 1.0)])),
        ]);
        assert!(detect(corpus.get("a").unwrap(), &corpus, &EngineThresholds::default()).is_empty());
    }

    #[test]
    fn test_table_is_symmetric() {
        assert!(are_opposed("critical", "affirmative"));
        assert!(are_opposed("affirmative", "critical"));
        assert!(!are_opposed("critical", "critical"));
    }
}
