//! Semantic similarity: cosine similarity between chunk embeddings across
//! documents.

use serde_json::json;

use super::{clamp_unit, sort_by_strength, EngineThresholds};
use crate::corpus::CorpusIndex;
use crate::models::{ChunkRecord, RawCandidate};
use crate::similarity::cosine_similarity;

pub fn detect(
    chunk: &ChunkRecord,
    corpus: &CorpusIndex,
    thresholds: &EngineThresholds,
) -> Vec<RawCandidate> {
    let source = match chunk.metadata.embedding.as_deref() {
        Some(v) if !v.is_empty() => v,
        _ => return Vec::new(),
    };

    let mut candidates: Vec<RawCandidate> = corpus
        .cross_document(chunk)
        .filter_map(|other| {
            let target = other.metadata.embedding.as_deref()?;
            let similarity = cosine_similarity(source, target) as f64;
            if similarity < thresholds.semantic_min_strength {
                return None;
            }
            Some(RawCandidate {
                target_chunk_id: other.chunk_id.clone(),
                strength: clamp_unit(similarity),
                metadata: json!({ "similarity": similarity }),
            })
        })
        .collect();

    sort_by_strength(&mut candidates);
    candidates.truncate(thresholds.semantic_top_k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::fixtures::chunk;
    use crate::models::ChunkMetadata;

    fn embedded(doc: &str, id: &str, v: Vec<f32>) -> ChunkRecord {
        chunk(
            doc,
            id,
            ChunkMetadata {
                embedding: Some(v),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_finds_similar_chunks_in_other_documents() {
        let corpus = CorpusIndex::new(vec![
            embedded("d1", "a", vec![1.0, 0.0]),
            embedded("d1", "b", vec![1.0, 0.0]),
            embedded("d2", "c", vec![0.9, 0.1]),
            embedded("d3", "d", vec![0.0, 1.0]),
        ]);
        let result = detect(corpus.get("a").unwrap(), &corpus, &EngineThresholds::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].target_chunk_id, "c");
        assert!(result[0].strength > 0.9);
    }

    #[test]
    fn test_keeps_top_k_by_strength() {
        let mut records = vec![embedded("src", "s", vec![1.0, 0.0])];
        for i in 0..30 {
            let y = i as f32 * 0.02;
            records.push(embedded(&format!("d{}", i), &format!("c{:02}", i), vec![1.0, y]));
        }
        let corpus = CorpusIndex::new(records);
        let result = detect(corpus.get("s").unwrap(), &corpus, &EngineThresholds::default());
        assert_eq!(result.len(), 20);
        assert_eq!(result[0].target_chunk_id, "c00");
        for pair in result.windows(2) {
            assert!(pair[0].strength >= pair[1].strength);
        }
    }

    #[test]
    fn test_missing_embedding_yields_nothing() {
        let corpus = CorpusIndex::new(vec![
            chunk("d1", "a", ChunkMetadata::default()),
            embedded("d2", "b", vec![1.0]),
        ]);
        assert!(detect(corpus.get("a").unwrap(), &corpus, &EngineThresholds::default()).is_empty());
    }
}
