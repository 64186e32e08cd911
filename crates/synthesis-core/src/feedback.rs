//! Feedback aggregation.
//!
//! Feedback is append-only; the only read path is a per-engine count over a
//! time window, consumed by the tuner.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Boost, Connection, EngineKind, Feedback, FeedbackAction, FeedbackContext};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackCounts {
    pub validated: u64,
    pub rejected: u64,
    pub starred: u64,
}

impl FeedbackCounts {
    pub fn record(&mut self, action: FeedbackAction) {
        match action {
            FeedbackAction::Validate => self.validated += 1,
            FeedbackAction::Reject => self.rejected += 1,
            FeedbackAction::Star => self.starred += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.validated + self.rejected + self.starred
    }

    /// `validated × 1 + starred × 2 − rejected × 1`.
    pub fn score(&self) -> i64 {
        self.validated as i64 + 2 * self.starred as i64 - self.rejected as i64
    }
}

/// Count feedback per engine for records at or after `since`.
pub fn aggregate(
    feedback: &[Feedback],
    since: DateTime<Utc>,
) -> BTreeMap<EngineKind, FeedbackCounts> {
    let mut counts: BTreeMap<EngineKind, FeedbackCounts> = BTreeMap::new();
    for f in feedback.iter().filter(|f| f.created_at >= since) {
        counts.entry(f.engine).or_default().record(f.action);
    }
    counts
}

/// Build the feedback record for an action on a connection.
pub fn new_feedback(
    connection: &Connection,
    action: FeedbackAction,
    context: FeedbackContext,
    now: DateTime<Utc>,
) -> Feedback {
    Feedback {
        id: uuid::Uuid::new_v4().to_string(),
        connection_id: connection.id.clone(),
        engine: connection.engine,
        action,
        context,
        created_at: now,
    }
}

/// The time-bounded boost created by starring a connection.
pub fn star_boost(
    connection: &Connection,
    multiplier: f64,
    duration: Duration,
    now: DateTime<Utc>,
) -> Boost {
    Boost {
        engine: connection.engine,
        connection_id: connection.id.clone(),
        multiplier,
        expires_at: now + duration,
    }
}
