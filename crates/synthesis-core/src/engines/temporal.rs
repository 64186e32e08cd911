//! Temporal rhythm: chunks that move at the same pace.
//!
//! `similarity = (1 − √((Δdensity² + Δmomentum²) / 2)) × phase factor`, with
//! density and momentum clamped to `[0, 1]` and a phase factor of `1.0` when
//! phase labels agree (or either is missing) and `0.8` otherwise.

use serde_json::json;

use super::{clamp_unit, sort_by_strength, EngineThresholds};
use crate::corpus::CorpusIndex;
use crate::models::{ChunkRecord, NarrativeRhythm, RawCandidate};

const PHASE_MISMATCH_FACTOR: f64 = 0.8;

pub fn detect(
    chunk: &ChunkRecord,
    corpus: &CorpusIndex,
    thresholds: &EngineThresholds,
) -> Vec<RawCandidate> {
    let rhythm = match chunk.metadata.rhythm.as_ref() {
        Some(r) if is_valid(r) => r,
        _ => return Vec::new(),
    };

    let mut candidates: Vec<RawCandidate> = corpus
        .others(chunk)
        .filter_map(|other| {
            let other_rhythm = other.metadata.rhythm.as_ref().filter(|r| is_valid(r))?;
            let similarity = rhythm_similarity(rhythm, other_rhythm);
            if similarity < thresholds.temporal_min_similarity {
                return None;
            }
            Some(RawCandidate {
                target_chunk_id: other.chunk_id.clone(),
                strength: similarity,
                metadata: json!({
                    "density_delta": (rhythm.density - other_rhythm.density).abs(),
                    "momentum_delta": (rhythm.momentum - other_rhythm.momentum).abs(),
                    "phase": rhythm.phase,
                    "other_phase": other_rhythm.phase,
                }),
            })
        })
        .collect();

    sort_by_strength(&mut candidates);
    candidates
}

fn is_valid(r: &NarrativeRhythm) -> bool {
    r.density.is_finite() && r.momentum.is_finite()
}

pub fn rhythm_similarity(a: &NarrativeRhythm, b: &NarrativeRhythm) -> f64 {
    let dd = clamp_unit(a.density) - clamp_unit(b.density);
    let dm = clamp_unit(a.momentum) - clamp_unit(b.momentum);
    let distance = ((dd * dd + dm * dm) / 2.0).sqrt();

    let phase_factor = match (a.phase.as_deref(), b.phase.as_deref()) {
        (Some(x), Some(y)) if !x.trim().eq_ignore_ascii_case(y.trim()) => PHASE_MISMATCH_FACTOR,
        _ => 1.0,
    };
    clamp_unit((1.0 - distance) * phase_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::fixtures::chunk;
    use crate::models::ChunkMetadata;

    fn rhythm(density: f64, momentum: f64, phase: Option<&str>) -> NarrativeRhythm {
        NarrativeRhythm {
            density,
            momentum,
            phase: phase.map(str::to_string),
        }
    }

    fn paced(doc: &str, id: &str, r: NarrativeRhythm) -> ChunkRecord {
        chunk(
            doc,
            id,
            ChunkMetadata {
                rhythm: Some(r),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_identical_rhythm_is_one() {
        let r = rhythm(0.4, 0.7, Some("rising"));
        assert!((rhythm_similarity(&r, &r) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_phase_mismatch_penalized() {
        let a = rhythm(0.4, 0.7, Some("rising"));
        let b = rhythm(0.4, 0.7, Some("resolution"));
        assert!((rhythm_similarity(&a, &b) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_opposite_extremes_filtered() {
        let corpus = CorpusIndex::new(vec![
            paced("d1", "a", rhythm(0.0, 0.0, None)),
            paced("d1", "b", rhythm(1.0, 1.0, None)),
            paced("d1", "c", rhythm(0.1, 0.2, None)),
            paced("d2", "n", rhythm(f64::NAN, 0.2, None)),
        ]);
        let result = detect(corpus.get("a").unwrap(), &corpus, &EngineThresholds::default());
        let ids: Vec<&str> = result.iter().map(|r| r.target_chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }
}
