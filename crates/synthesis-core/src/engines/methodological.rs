//! Methodological echo: chunks that reason the same way.
//!
//! Similarity over [`MethodologySignature`]s:
//! `0.6 × approach match + 0.3 × Jaccard(techniques) + 0.1 × evidence match`,
//! where an approach match is `1.0` for the same named approach, `0.5` for a
//! partial match (containment or a shared word), and `0.0` otherwise.

use std::collections::BTreeSet;

use serde_json::json;

use super::{sort_by_strength, EngineThresholds};
use crate::corpus::CorpusIndex;
use crate::models::{ChunkRecord, MethodologySignature, RawCandidate};
use crate::similarity::{jaccard, tag_set};

pub fn detect(
    chunk: &ChunkRecord,
    corpus: &CorpusIndex,
    thresholds: &EngineThresholds,
) -> Vec<RawCandidate> {
    let signature = match chunk.metadata.methodology.as_ref() {
        Some(sig) if !sig.approach.trim().is_empty() => sig,
        _ => return Vec::new(),
    };

    let mut candidates: Vec<RawCandidate> = corpus
        .others(chunk)
        .filter_map(|other| {
            let other_sig = other.metadata.methodology.as_ref()?;
            let (similarity, approach_match) = signature_similarity(signature, other_sig);
            if similarity < thresholds.methodological_min_similarity {
                return None;
            }
            Some(RawCandidate {
                target_chunk_id: other.chunk_id.clone(),
                strength: similarity,
                metadata: json!({
                    "approach": signature.approach,
                    "other_approach": other_sig.approach,
                    "approach_match": approach_match,
                }),
            })
        })
        .collect();

    sort_by_strength(&mut candidates);
    candidates
}

/// Similarity in `[0, 1]` and a label for the approach match
/// (`"exact"`, `"partial"`, `"none"`).
pub fn signature_similarity(a: &MethodologySignature, b: &MethodologySignature) -> (f64, &'static str) {
    let (approach, label) = approach_match(&a.approach, &b.approach);
    let techniques = jaccard(&tag_set(&a.techniques), &tag_set(&b.techniques));
    let evidence = match (&a.evidence_type, &b.evidence_type) {
        (Some(x), Some(y)) if x.trim().eq_ignore_ascii_case(y.trim()) && !x.trim().is_empty() => 1.0,
        _ => 0.0,
    };
    (0.6 * approach + 0.3 * techniques + 0.1 * evidence, label)
}

fn approach_match(a: &str, b: &str) -> (f64, &'static str) {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return (0.0, "none");
    }
    if a == b {
        return (1.0, "exact");
    }
    if a.contains(&b) || b.contains(&a) {
        return (0.5, "partial");
    }
    let words = |s: &str| -> BTreeSet<String> {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
            .map(str::to_string)
            .collect()
    };
    if words(&a).intersection(&words(&b)).next().is_some() {
        (0.5, "partial")
    } else {
        (0.0, "none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::fixtures::{chunk, tags};
    use crate::models::ChunkMetadata;

    fn sig(approach: &str, techniques: &[&str], evidence: Option<&str>) -> MethodologySignature {
        MethodologySignature {
            approach: approach.to_string(),
            techniques: tags(techniques),
            evidence_type: evidence.map(str::to_string),
        }
    }

    fn with_sig(doc: &str, id: &str, s: MethodologySignature) -> ChunkRecord {
        chunk(
            doc,
            id,
            ChunkMetadata {
                methodology: Some(s),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_exact_approach_match() {
        let a = sig("Dialectical", &["thesis", "counterexample"], Some("textual"));
        let b = sig("dialectical", &["thesis", "counterexample"], Some("Textual"));
        let (s, label) = signature_similarity(&a, &b);
        assert!((s - 1.0).abs() < 1e-9);
        assert_eq!(label, "exact");
    }

    #[test]
    fn test_partial_approach_match() {
        let a = sig("comparative case study", &[], None);
        let b = sig("single case study", &[], None);
        let (s, label) = signature_similarity(&a, &b);
        assert_eq!(label, "partial");
        assert!((s - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_detect_within_document_allowed() {
        let corpus = CorpusIndex::new(vec![
            with_sig("d1", "a", sig("phenomenological", &["bracketing"], None)),
            with_sig("d1", "b", sig("phenomenological", &[], None)),
            with_sig("d2", "c", sig("statistical", &["regression"], None)),
            chunk("d3", "d", ChunkMetadata::default()),
        ]);
        let result = detect(corpus.get("a").unwrap(), &corpus, &EngineThresholds::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].target_chunk_id, "b");
        assert!((result[0].strength - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_blank_approach_yields_nothing() {
        let corpus = CorpusIndex::new(vec![
            with_sig("d1", "a", sig("  ", &["x"], None)),
            with_sig("d2", "b", sig("dialectical", &["x"], None)),
        ]);
        assert!(detect(corpus.get("a").unwrap(), &corpus, &EngineThresholds::default()).is_empty());
    }
}
