//! Storage limits applied to a detection run before persistence.
//!
//! # Algorithm
//!
//! 1. Drop candidates from disabled engines and deduplicate identical
//!    `(source, target, engine)` triples, keeping the highest raw strength.
//! 2. Group by source chunk.
//! 3. Within a group, score `weighted = raw × weight[engine]` and sort by
//!    weighted score (desc), then engine priority, then raw strength (desc),
//!    then target id (asc).
//! 4. Walk the sorted list, dropping candidates once their engine has reached
//!    `max_per_engine`.
//! 5. Truncate what remains to `max_per_chunk`.
//!
//! The weighted score is only used for selection; the returned candidates
//! still carry their raw strength.

use std::collections::{BTreeMap, HashMap};

use crate::models::{CandidateConnection, EngineKind};
use crate::weights::EngineConfig;

/// Deduplicate `(source, target, engine)` triples, keeping the strongest.
pub fn dedupe(candidates: Vec<CandidateConnection>) -> Vec<CandidateConnection> {
    let mut best: HashMap<(String, String, EngineKind), CandidateConnection> = HashMap::new();
    for candidate in candidates {
        let key = (
            candidate.source_chunk_id.clone(),
            candidate.target_chunk_id.clone(),
            candidate.engine,
        );
        match best.get(&key) {
            Some(existing) if existing.raw_strength >= candidate.raw_strength => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }
    best.into_values().collect()
}

/// Bound a detection run's candidates per the user's limits.
///
/// Output is grouped by source chunk (ascending id), each group in selection
/// order.
pub fn apply_limits(
    candidates: Vec<CandidateConnection>,
    config: &EngineConfig,
) -> Vec<CandidateConnection> {
    let enabled: Vec<CandidateConnection> = candidates
        .into_iter()
        .filter(|c| config.is_enabled(c.engine))
        .collect();

    let mut groups: BTreeMap<String, Vec<CandidateConnection>> = BTreeMap::new();
    for candidate in dedupe(enabled) {
        groups
            .entry(candidate.source_chunk_id.clone())
            .or_default()
            .push(candidate);
    }

    let mut kept = Vec::new();
    for (_, mut group) in groups {
        sort_for_selection(&mut group, config);

        let mut per_engine: HashMap<EngineKind, usize> = HashMap::new();
        let mut selected: Vec<CandidateConnection> = Vec::new();
        for candidate in group {
            let count = per_engine.entry(candidate.engine).or_insert(0);
            if *count >= config.max_per_engine {
                continue;
            }
            *count += 1;
            selected.push(candidate);
        }
        selected.truncate(config.max_per_chunk);
        kept.extend(selected);
    }
    kept
}

fn sort_for_selection(group: &mut [CandidateConnection], config: &EngineConfig) {
    group.sort_by(|a, b| {
        let wa = a.raw_strength * config.weight(a.engine);
        let wb = b.raw_strength * config.weight(b.engine);
        wb.partial_cmp(&wa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| config.priority_rank(a.engine).cmp(&config.priority_rank(b.engine)))
            .then_with(|| {
                b.raw_strength
                    .partial_cmp(&a.raw_strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.target_chunk_id.cmp(&b.target_chunk_id))
    });
}
