//! Read path and live configuration edits.
//!
//! [`get_connections_for_chunks`] is called whenever the reader's visible
//! chunks change: it loads active connections, consults active starred
//! boosts, and re-ranks against the caller's EngineConfig. Nothing here
//! mutates persisted connections, so weight edits take effect on the next
//! read without re-detection.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use synthesis_core::models::EngineKind;
use synthesis_core::ranking::{rank, BoostTable, RankedConnection};
use synthesis_core::store::Store;
use synthesis_core::weights::{EngineConfig, EngineConfigPatch, WeightState};

use crate::config::Config;
use crate::sqlite_store::open_store;

/// Load a user's weight state, creating and saving the default one on first
/// use.
pub async fn load_or_init_state(
    store: &dyn Store,
    config: &Config,
    user_id: &str,
) -> Result<WeightState> {
    if let Some(state) = store.load_weight_state(user_id).await? {
        return Ok(state);
    }
    let state = WeightState::new(config.initial_engine_config(user_id), Utc::now());
    store.save_weight_state(&state, &[]).await?;
    tracing::info!(user_id, "initialized default engine config");
    Ok(state)
}

/// Ranked active connections whose source is one of `chunk_ids`.
pub async fn get_connections_for_chunks(
    store: &dyn Store,
    chunk_ids: &[String],
    engine_config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<Vec<RankedConnection>> {
    if chunk_ids.is_empty() {
        return Ok(Vec::new());
    }
    let connections = store.active_connections_for_chunks(chunk_ids).await?;
    let boosts = BoostTable::from_boosts(&store.active_boosts(now).await?, now);
    Ok(rank(&connections, engine_config, &boosts))
}

/// Apply a partial config edit for `user_id`. Weight changes are recorded as
/// user-override audit entries. Concurrent writers resolve last-write-wins on
/// the state row.
pub async fn update_engine_config(
    store: &dyn Store,
    config: &Config,
    user_id: &str,
    patch: &EngineConfigPatch,
) -> Result<WeightState> {
    let mut state = load_or_init_state(store, config, user_id).await?;
    if patch.is_empty() {
        return Ok(state);
    }
    let adjustments = state.apply_patch(patch, Utc::now())?;
    store.save_weight_state(&state, &adjustments).await?;
    tracing::info!(
        user_id,
        weight_changes = adjustments.len(),
        "engine config updated"
    );
    Ok(state)
}

// ============ CLI commands ============

pub async fn run_connections(config: &Config, chunk_ids: &[String], limit: usize) -> Result<()> {
    let store = open_store(config).await?;
    let state = load_or_init_state(store.as_ref(), config, &config.user.default_id).await?;
    let ranked =
        get_connections_for_chunks(store.as_ref(), chunk_ids, &state.config, Utc::now()).await?;

    if ranked.is_empty() {
        println!("No connections.");
        return Ok(());
    }
    println!(
        "{:<38} {:<16} {:>7} {:>7}  {} -> {}",
        "ID", "ENGINE", "SCORE", "RAW", "SOURCE", "TARGET"
    );
    for r in ranked.iter().take(limit) {
        let c = &r.connection;
        println!(
            "{:<38} {:<16} {:>7.3} {:>7.3}  {} -> {}{}",
            c.id,
            c.engine.as_str(),
            r.weighted_score,
            c.raw_strength,
            c.source_chunk_id,
            c.target_chunk_id,
            if r.boost > 1.0 { "  (boosted)" } else { "" }
        );
    }
    if ranked.len() > limit {
        println!("... {} more", ranked.len() - limit);
    }
    Ok(())
}

pub async fn run_config_show(config: &Config, user_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let state = load_or_init_state(store.as_ref(), config, user_id).await?;
    print_engine_config(&state);
    Ok(())
}

pub async fn run_config_set(
    config: &Config,
    user_id: &str,
    engine: EngineKind,
    weight: Option<f64>,
    enabled: Option<bool>,
) -> Result<()> {
    let patch = EngineConfigPatch {
        weights: weight.map(|w| [(engine, w)].into_iter().collect()),
        enabled: enabled.map(|e| [(engine, e)].into_iter().collect()),
        ..Default::default()
    };
    if patch.is_empty() {
        anyhow::bail!("nothing to change: pass --weight and/or --enabled");
    }
    let store = open_store(config).await?;
    let state = update_engine_config(store.as_ref(), config, user_id, &patch).await?;
    print_engine_config(&state);
    Ok(())
}

fn print_engine_config(state: &WeightState) {
    let cfg = &state.config;
    println!("Engine config for '{}'", cfg.user_id);
    println!(
        "  limits: {} per chunk, {} per engine",
        cfg.max_per_chunk, cfg.max_per_engine
    );
    println!(
        "  last tuned: {}",
        state
            .last_tuned_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  {:<4} {:<16} {:>6}  {}", "PRI", "ENGINE", "WEIGHT", "ENABLED");
    for (i, engine) in cfg.priority.iter().enumerate() {
        println!(
            "  {:<4} {:<16} {:>6.2}  {}",
            i + 1,
            engine.as_str(),
            cfg.weight(*engine),
            if cfg.is_enabled(*engine) { "yes" } else { "no" }
        );
    }
}

pub async fn run_history(config: &Config, user_id: &str, limit: usize) -> Result<()> {
    let store = open_store(config).await?;
    let history = store.adjustment_history(user_id, limit).await?;
    if history.is_empty() {
        println!("No weight adjustments recorded for '{}'.", user_id);
        return Ok(());
    }
    println!(
        "{:<20} {:<16} {:>6} {:>6} {:>7}  {:<13} {}",
        "AT", "ENGINE", "FROM", "TO", "DELTA", "REASON", "DETAIL"
    );
    for adj in history {
        println!(
            "{:<20} {:<16} {:>6.2} {:>6.2} {:>+7.2}  {:<13} {}",
            adj.at.format("%Y-%m-%d %H:%M:%S"),
            adj.engine.as_str(),
            adj.previous,
            adj.new,
            adj.delta,
            adj.reason.as_str(),
            adj.detail
        );
    }
    Ok(())
}

/// Rows removed by [`prune`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneSummary {
    pub connections: usize,
    pub boosts: usize,
}

/// Delete superseded connections created before `before` and every boost
/// that has expired by `now`.
pub async fn prune(
    store: &dyn Store,
    before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<PruneSummary> {
    let connections = store.prune_superseded(before).await?;
    let boosts = store.prune_expired_boosts(now).await?;
    tracing::info!(connections, boosts, "pruned superseded connections and expired boosts");
    Ok(PruneSummary { connections, boosts })
}

pub async fn run_prune(config: &Config, older_than_days: i64) -> Result<()> {
    let store = open_store(config).await?;
    let now = Utc::now();
    let before = now - Duration::days(older_than_days.max(0));
    let summary = prune(store.as_ref(), before, now).await?;
    println!(
        "Pruned {} superseded connections and {} expired boosts.",
        summary.connections, summary.boosts
    );
    Ok(())
}
