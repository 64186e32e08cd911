//! Feedback recording.
//!
//! The only validation is that the connection exists; the action has
//! already been parsed into a [`FeedbackAction`]. Starring additionally
//! creates a time-bounded boost on the connection's engine, which the
//! ranking service consults until it expires. The boost never touches the
//! persisted weight.

use anyhow::Result;
use chrono::{Duration, Utc};

use synthesis_core::error::SynthesisError;
use synthesis_core::feedback::{new_feedback, star_boost};
use synthesis_core::models::{Feedback, FeedbackAction, FeedbackContext};
use synthesis_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::open_store;

pub async fn record_feedback(
    store: &dyn Store,
    config: &Config,
    connection_id: &str,
    action: FeedbackAction,
    context: FeedbackContext,
) -> Result<Feedback> {
    let connection = store
        .get_connection(connection_id)
        .await?
        .ok_or_else(|| SynthesisError::UnknownConnection(connection_id.to_string()))?;

    let now = Utc::now();
    let feedback = new_feedback(&connection, action, context, now);
    store.append_feedback(&feedback).await?;

    if action == FeedbackAction::Star {
        let boost = star_boost(
            &connection,
            config.tuner.star_boost_multiplier,
            Duration::hours(config.tuner.star_boost_hours),
            now,
        );
        store.add_boost(&boost).await?;
        tracing::debug!(
            engine = %boost.engine,
            multiplier = boost.multiplier,
            expires_at = %boost.expires_at,
            "starred boost added"
        );
    }

    tracing::info!(
        connection_id,
        engine = %feedback.engine,
        action = %feedback.action,
        "feedback recorded"
    );
    Ok(feedback)
}

pub async fn run_feedback(
    config: &Config,
    connection_id: &str,
    action: FeedbackAction,
    context: FeedbackContext,
) -> Result<()> {
    let store = open_store(config).await?;
    let feedback = record_feedback(store.as_ref(), config, connection_id, action, context).await?;
    println!(
        "Recorded {} on {} ({})",
        feedback.action, feedback.connection_id, feedback.engine
    );
    if feedback.action == FeedbackAction::Star {
        println!(
            "  {} boosted x{} for {}h",
            feedback.engine, config.tuner.star_boost_multiplier, config.tuner.star_boost_hours
        );
    }
    Ok(())
}
