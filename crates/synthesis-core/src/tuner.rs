//! Weight tuning from aggregated feedback.
//!
//! For each engine with feedback in the window, the sign of
//! [`FeedbackCounts::score`] picks the direction of a fixed step; the
//! magnitude never depends on the score. The result is clamped to
//! `[MIN_WEIGHT, MAX_WEIGHT]`. Engines without feedback, or with a score of
//! exactly zero, are left unchanged. The tuner never disables an engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::feedback::FeedbackCounts;
use crate::models::EngineKind;
use crate::weights::{clamp_weight, AdjustmentReason, WeightAdjustment, WeightState};

pub const DEFAULT_STEP: f64 = 0.1;

/// Compute the adjustments a tuning cycle would make. Adjustments whose
/// clamped delta is zero (already at a bound) are omitted.
pub fn plan(
    state: &WeightState,
    counts: &BTreeMap<EngineKind, FeedbackCounts>,
    step: f64,
    now: DateTime<Utc>,
) -> Vec<WeightAdjustment> {
    let mut adjustments = Vec::new();
    for (engine, c) in counts {
        if c.total() == 0 {
            continue;
        }
        let score = c.score();
        let direction = match score.signum() {
            0 => continue,
            s => s as f64,
        };
        let previous = state.config.weight(*engine);
        let new = clamp_weight(previous + direction * step);
        // Snap away float noise from repeated ±0.1 steps.
        let new = (new * 1e9).round() / 1e9;
        let delta = new - previous;
        if delta.abs() < 1e-12 {
            continue;
        }
        adjustments.push(WeightAdjustment {
            user_id: state.config.user_id.clone(),
            engine: *engine,
            previous,
            new,
            delta,
            reason: AdjustmentReason::Tuner,
            detail: format!(
                "score {} (validated {}, starred {}, rejected {})",
                score, c.validated, c.starred, c.rejected
            ),
            at: now,
        });
    }
    adjustments
}

/// Apply planned adjustments to the state and stamp the tuning time.
pub fn apply(state: &mut WeightState, adjustments: &[WeightAdjustment], now: DateTime<Utc>) {
    for adj in adjustments {
        state.config.weights.insert(adj.engine, clamp_weight(adj.new));
    }
    state.last_tuned_at = Some(now);
    state.updated_at = now;
}
