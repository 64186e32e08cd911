//! Per-user engine configuration and weight state.
//!
//! [`EngineConfig`] is passed explicitly into every limiting and ranking
//! call; nothing in the core holds it as ambient state. [`WeightState`] wraps
//! the config with the tuner's bookkeeping, and every weight change is
//! recorded as a [`WeightAdjustment`] for auditability.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SynthesisError;
use crate::models::EngineKind;

pub const MIN_WEIGHT: f64 = 0.1;
pub const MAX_WEIGHT: f64 = 1.0;

pub const DEFAULT_MAX_PER_CHUNK: usize = 50;
pub const DEFAULT_MAX_PER_ENGINE: usize = 10;

/// Clamp a weight into `[MIN_WEIGHT, MAX_WEIGHT]`.
pub fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        return MIN_WEIGHT;
    }
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub user_id: String,
    /// Tie-break priority, highest first. Always a permutation of all engines.
    pub priority: Vec<EngineKind>,
    pub weights: BTreeMap<EngineKind, f64>,
    pub enabled: BTreeMap<EngineKind, bool>,
    pub max_per_chunk: usize,
    pub max_per_engine: usize,
}

impl EngineConfig {
    /// Default configuration: every engine enabled at weight 1.0.
    pub fn new(user_id: &str) -> Self {
        Self::with_limits(user_id, DEFAULT_MAX_PER_CHUNK, DEFAULT_MAX_PER_ENGINE)
    }

    pub fn with_limits(user_id: &str, max_per_chunk: usize, max_per_engine: usize) -> Self {
        Self {
            user_id: user_id.to_string(),
            priority: EngineKind::ALL.to_vec(),
            weights: EngineKind::ALL.iter().map(|e| (*e, MAX_WEIGHT)).collect(),
            enabled: EngineKind::ALL.iter().map(|e| (*e, true)).collect(),
            max_per_chunk,
            max_per_engine,
        }
    }

    /// Current weight. Missing entries read as the maximum weight.
    pub fn weight(&self, engine: EngineKind) -> f64 {
        self.weights.get(&engine).copied().unwrap_or(MAX_WEIGHT)
    }

    pub fn is_enabled(&self, engine: EngineKind) -> bool {
        self.enabled.get(&engine).copied().unwrap_or(true)
    }

    /// Position in the priority list (lower is preferred). Engines missing
    /// from the list sort last.
    pub fn priority_rank(&self, engine: EngineKind) -> usize {
        self.priority
            .iter()
            .position(|e| *e == engine)
            .unwrap_or(self.priority.len())
    }

    pub fn enabled_engines(&self) -> Vec<EngineKind> {
        self.priority
            .iter()
            .copied()
            .filter(|e| self.is_enabled(*e))
            .collect()
    }

    pub fn validate(&self) -> Result<(), SynthesisError> {
        for (engine, weight) in &self.weights {
            if !(MIN_WEIGHT..=MAX_WEIGHT).contains(weight) {
                return Err(SynthesisError::InvalidWeight {
                    engine: *engine,
                    weight: *weight,
                });
            }
        }
        validate_limits(self.max_per_chunk, self.max_per_engine)?;
        validate_priority(&self.priority)?;
        Ok(())
    }
}

fn validate_limits(max_per_chunk: usize, max_per_engine: usize) -> Result<(), SynthesisError> {
    if max_per_chunk == 0 || max_per_engine == 0 {
        return Err(SynthesisError::InvalidLimits(
            "limits must be >= 1".to_string(),
        ));
    }
    if max_per_engine > max_per_chunk {
        return Err(SynthesisError::InvalidLimits(format!(
            "max_per_engine ({}) exceeds max_per_chunk ({})",
            max_per_engine, max_per_chunk
        )));
    }
    Ok(())
}

fn validate_priority(priority: &[EngineKind]) -> Result<(), SynthesisError> {
    for (i, engine) in priority.iter().enumerate() {
        if priority[..i].contains(engine) {
            return Err(SynthesisError::InvalidPriority(format!(
                "{} listed more than once",
                engine
            )));
        }
    }
    Ok(())
}

/// A partial update to an [`EngineConfig`]. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfigPatch {
    #[serde(default)]
    pub priority: Option<Vec<EngineKind>>,
    #[serde(default)]
    pub weights: Option<BTreeMap<EngineKind, f64>>,
    #[serde(default)]
    pub enabled: Option<BTreeMap<EngineKind, bool>>,
    #[serde(default)]
    pub max_per_chunk: Option<usize>,
    #[serde(default)]
    pub max_per_engine: Option<usize>,
}

impl EngineConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.priority.is_none()
            && self.weights.is_none()
            && self.enabled.is_none()
            && self.max_per_chunk.is_none()
            && self.max_per_engine.is_none()
    }
}

/// Why a weight changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    Tuner,
    UserOverride,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::Tuner => "tuner",
            AdjustmentReason::UserOverride => "user_override",
        }
    }
}

/// One audited weight change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightAdjustment {
    pub user_id: String,
    pub engine: EngineKind,
    pub previous: f64,
    pub new: f64,
    pub delta: f64,
    pub reason: AdjustmentReason,
    /// Free-form detail, e.g. the feedback score that drove a tuner step.
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// The persisted per-user row: current config plus tuner bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightState {
    pub config: EngineConfig,
    /// End of the feedback window consumed by the last tuning run.
    pub last_tuned_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WeightState {
    pub fn new(config: EngineConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            last_tuned_at: None,
            updated_at: now,
        }
    }

    /// Apply a user edit. Returns the audit entries for changed weights.
    ///
    /// A priority list that omits engines is completed with the missing ones
    /// in their current relative order.
    pub fn apply_patch(
        &mut self,
        patch: &EngineConfigPatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<WeightAdjustment>, SynthesisError> {
        let mut next = self.config.clone();

        if let Some(weights) = &patch.weights {
            for (engine, weight) in weights {
                if !(MIN_WEIGHT..=MAX_WEIGHT).contains(weight) {
                    return Err(SynthesisError::InvalidWeight {
                        engine: *engine,
                        weight: *weight,
                    });
                }
                next.weights.insert(*engine, *weight);
            }
        }
        if let Some(enabled) = &patch.enabled {
            for (engine, flag) in enabled {
                next.enabled.insert(*engine, *flag);
            }
        }
        if let Some(priority) = &patch.priority {
            validate_priority(priority)?;
            let mut full = priority.clone();
            for engine in &self.config.priority {
                if !full.contains(engine) {
                    full.push(*engine);
                }
            }
            for engine in EngineKind::ALL {
                if !full.contains(&engine) {
                    full.push(engine);
                }
            }
            next.priority = full;
        }
        if let Some(n) = patch.max_per_chunk {
            next.max_per_chunk = n;
        }
        if let Some(n) = patch.max_per_engine {
            next.max_per_engine = n;
        }
        next.validate()?;

        let adjustments = EngineKind::ALL
            .iter()
            .filter_map(|engine| {
                let previous = self.config.weight(*engine);
                let new = next.weight(*engine);
                if (previous - new).abs() < f64::EPSILON {
                    return None;
                }
                Some(WeightAdjustment {
                    user_id: self.config.user_id.clone(),
                    engine: *engine,
                    previous,
                    new,
                    delta: new - previous,
                    reason: AdjustmentReason::UserOverride,
                    detail: "manual edit".to_string(),
                    at: now,
                })
            })
            .collect();

        self.config = next;
        self.updated_at = now;
        Ok(adjustments)
    }
}
