//! Read-time ranking.
//!
//! Persisted connections carry raw strength only. Ranking recomputes
//! `weighted = raw × weight[engine] × boost[engine]` against the caller's
//! current [`EngineConfig`] and any active starred boosts, then sorts. It is
//! a linear scan plus one sort, so weight edits re-rank instantly without
//! re-detection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Boost, Connection, EngineKind};
use crate::weights::EngineConfig;

/// A connection with its read-time score.
#[derive(Debug, Clone, Serialize)]
pub struct RankedConnection {
    #[serde(flatten)]
    pub connection: Connection,
    pub weighted_score: f64,
    /// Multiplier applied from an active starred boost (1.0 if none).
    pub boost: f64,
}

/// Active boost multipliers per engine. Overlapping boosts on one engine do
/// not compound: the largest active multiplier applies.
#[derive(Debug, Clone, Default)]
pub struct BoostTable {
    multipliers: HashMap<EngineKind, f64>,
}

impl BoostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_boosts(boosts: &[Boost], now: DateTime<Utc>) -> Self {
        let mut table = Self::new();
        for boost in boosts.iter().filter(|b| b.is_active(now)) {
            table.insert(boost.engine, boost.multiplier);
        }
        table
    }

    pub fn insert(&mut self, engine: EngineKind, multiplier: f64) {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return;
        }
        let entry = self.multipliers.entry(engine).or_insert(1.0);
        *entry = entry.max(multiplier);
    }

    pub fn multiplier(&self, engine: EngineKind) -> f64 {
        self.multipliers.get(&engine).copied().unwrap_or(1.0)
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.is_empty()
    }
}

/// Re-score and order connections.
///
/// Connections from disabled engines and superseded connections are
/// excluded. Ordering: weighted score (desc), engine priority, raw strength
/// (desc), connection id (asc).
pub fn rank(
    connections: &[Connection],
    config: &EngineConfig,
    boosts: &BoostTable,
) -> Vec<RankedConnection> {
    let mut ranked: Vec<RankedConnection> = connections
        .iter()
        .filter(|c| !c.superseded && config.is_enabled(c.engine))
        .map(|c| {
            let boost = boosts.multiplier(c.engine);
            RankedConnection {
                connection: c.clone(),
                weighted_score: c.raw_strength * config.weight(c.engine) * boost,
                boost,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.weighted_score
            .partial_cmp(&a.weighted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                config
                    .priority_rank(a.connection.engine)
                    .cmp(&config.priority_rank(b.connection.engine))
            })
            .then_with(|| {
                b.connection
                    .raw_strength
                    .partial_cmp(&a.connection.raw_strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.connection.id.cmp(&b.connection.id))
    });
    ranked
}
