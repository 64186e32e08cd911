//! Weight tuning job: `tune(user_id)`.
//!
//! Meant to run on a schedule (e.g. nightly). The feedback window starts at
//! the later of `now - window_days` and the previous run's end, so running
//! twice in the same cycle sees no new feedback and changes nothing. Runs
//! for the same user are exclusive within a process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use synthesis_core::feedback::{aggregate, FeedbackCounts};
use synthesis_core::models::EngineKind;
use synthesis_core::store::Store;
use synthesis_core::tuner;
use synthesis_core::weights::WeightAdjustment;

use crate::config::Config;
use crate::query::load_or_init_state;
use crate::sqlite_store::open_store;

#[derive(Debug, Clone, Serialize)]
pub struct TuneReport {
    pub user_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub feedback_count: usize,
    pub counts: BTreeMap<EngineKind, FeedbackCounts>,
    pub adjustments: Vec<WeightAdjustment>,
}

fn user_lock(user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    locks.entry(user_id.to_string()).or_default().clone()
}

/// Run one tuning cycle for `user_id` as of `now`.
pub async fn tune(
    store: &dyn Store,
    config: &Config,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<TuneReport> {
    let lock = user_lock(user_id);
    let _guard = lock.lock().await;

    let mut state = load_or_init_state(store, config, user_id).await?;

    let mut window_start = now - Duration::days(config.tuner.window_days);
    if let Some(last) = state.last_tuned_at {
        // Feedback stamped exactly at the previous run's end was already seen.
        window_start = window_start.max(last + Duration::microseconds(1));
    }

    let feedback: Vec<_> = store
        .feedback_since(window_start)
        .await?
        .into_iter()
        .filter(|f| f.created_at <= now)
        .collect();
    let counts = aggregate(&feedback, window_start);
    let adjustments = tuner::plan(&state, &counts, config.tuner.step, now);

    tuner::apply(&mut state, &adjustments, now);
    store.save_weight_state(&state, &adjustments).await?;

    for adj in &adjustments {
        tracing::info!(
            user_id,
            engine = %adj.engine,
            previous = adj.previous,
            new = adj.new,
            "{}",
            adj.detail
        );
    }
    tracing::info!(
        user_id,
        feedback = feedback.len(),
        adjusted = adjustments.len(),
        "tuning cycle complete"
    );

    Ok(TuneReport {
        user_id: user_id.to_string(),
        window_start,
        window_end: now,
        feedback_count: feedback.len(),
        counts,
        adjustments,
    })
}

pub async fn run_tune(config: &Config, user_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let report = tune(store.as_ref(), config, user_id, Utc::now()).await?;

    println!(
        "Tuned '{}' over {} feedback records since {}",
        report.user_id,
        report.feedback_count,
        report.window_start.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if report.adjustments.is_empty() {
        println!("  No weight changes.");
    }
    for adj in &report.adjustments {
        println!(
            "  {:<16} {:.2} -> {:.2}  ({})",
            adj.engine.as_str(),
            adj.previous,
            adj.new,
            adj.detail
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use synthesis_core::models::{Feedback, FeedbackAction, FeedbackContext};
    use synthesis_core::store::memory::InMemoryStore;
    use synthesis_core::weights::{EngineConfig, WeightState, MIN_WEIGHT};

    fn config() -> Config {
        toml::from_str("[db]\npath = \"/tmp/unused.sqlite\"\n").unwrap()
    }

    async fn give(
        store: &InMemoryStore,
        engine: EngineKind,
        action: FeedbackAction,
        n: usize,
        at: DateTime<Utc>,
    ) {
        for _ in 0..n {
            store
                .append_feedback(&Feedback {
                    id: uuid::Uuid::new_v4().to_string(),
                    connection_id: "c".to_string(),
                    engine,
                    action,
                    context: FeedbackContext::default(),
                    created_at: at,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_contradiction_scenario_and_idempotency() {
        let store = InMemoryStore::new();
        let cfg = config();
        let now = Utc::now();
        let mut start = EngineConfig::new("u");
        start.weights.insert(EngineKind::Contradiction, 0.6);
        store
            .save_weight_state(&WeightState::new(start, now), &[])
            .await
            .unwrap();

        let at = now - Duration::days(2);
        give(&store, EngineKind::Contradiction, FeedbackAction::Validate, 10, at).await;
        give(&store, EngineKind::Contradiction, FeedbackAction::Reject, 1, at).await;
        give(&store, EngineKind::Contradiction, FeedbackAction::Star, 2, at).await;
        // Outside the 30-day window.
        give(&store, EngineKind::Semantic, FeedbackAction::Reject, 5, now - Duration::days(45)).await;

        let first = tune(&store, &cfg, "u", now).await.unwrap();
        assert_eq!(first.counts[&EngineKind::Contradiction].score(), 13);
        assert_eq!(first.adjustments.len(), 1);
        assert!((first.adjustments[0].new - 0.7).abs() < 1e-9);

        let second = tune(&store, &cfg, "u", now + Duration::minutes(1)).await.unwrap();
        assert_eq!(second.feedback_count, 0);
        assert!(second.adjustments.is_empty());

        let state = store.load_weight_state("u").await.unwrap().unwrap();
        assert!((state.config.weight(EngineKind::Contradiction) - 0.7).abs() < 1e-9);
        assert_eq!(state.config.weight(EngineKind::Semantic), 1.0);
    }

    #[tokio::test]
    async fn test_no_feedback_leaves_weights_unchanged() {
        let store = InMemoryStore::new();
        let report = tune(&store, &config(), "u", Utc::now()).await.unwrap();
        assert!(report.adjustments.is_empty());
        let state = store.load_weight_state("u").await.unwrap().unwrap();
        assert!(state.last_tuned_at.is_some());
        for engine in EngineKind::ALL {
            assert_eq!(state.config.weight(engine), 1.0);
        }
    }

    #[tokio::test]
    async fn test_repeated_rejection_stops_at_floor() {
        let store = InMemoryStore::new();
        let cfg = config();
        let mut now = Utc::now();
        for _ in 0..15 {
            now += Duration::days(1);
            let at = now - Duration::hours(1);
            give(&store, EngineKind::Temporal, FeedbackAction::Reject, 3, at).await;
            tune(&store, &cfg, "u", now).await.unwrap();
        }
        let state = store.load_weight_state("u").await.unwrap().unwrap();
        assert!((state.config.weight(EngineKind::Temporal) - MIN_WEIGHT).abs() < 1e-9);
        assert!(state.config.is_enabled(EngineKind::Temporal));
        let history = store.adjustment_history("u", 100).await.unwrap();
        assert_eq!(history.len(), 9);
    }
}
