//! SQLite-backed [`Store`] implementation.
//!
//! Chunk embeddings are stored as little-endian f32 BLOBs next to the rest
//! of the chunk metadata, which is kept as JSON. Connection batches are
//! written in a single transaction together with the supersede update and
//! the detection-run row, so a reader never sees a half-applied run.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use synthesis_core::error::SynthesisError;
use synthesis_core::models::{
    Boost, CandidateConnection, ChunkMetadata, ChunkRecord, Connection, DetectionRun, EngineKind,
    Feedback, FeedbackAction, FeedbackContext, PersistOutcome,
};
use synthesis_core::similarity::{blob_to_vec, vec_to_blob};
use synthesis_core::store::Store;
use synthesis_core::weights::{AdjustmentReason, EngineConfig, WeightAdjustment, WeightState};

use crate::config::Config;
use crate::db;

/// SQLite's default bound-parameter limit is 999; stay well under it.
const IN_CLAUSE_BATCH: usize = 500;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Connect to the configured database and wrap it as a shared [`Store`].
///
/// The schema must already exist (`synth init`).
pub async fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    let pool = db::connect(config).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

fn row_to_chunk(row: &SqliteRow) -> Result<ChunkRecord> {
    let chunk_id: String = row.get("chunk_id");
    let metadata_json: String = row.get("metadata_json");
    let mut metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("Corrupt metadata for chunk {}", chunk_id))?;
    let embedding: Option<Vec<u8>> = row.get("embedding");
    metadata.embedding = embedding.map(|blob| blob_to_vec(&blob));
    Ok(ChunkRecord {
        document_id: row.get("document_id"),
        version_id: row.get("version_id"),
        chunk_id,
        metadata,
    })
}

fn row_to_connection(row: &SqliteRow) -> Result<Connection> {
    let engine: String = row.get("engine");
    let metadata_json: String = row.get("metadata_json");
    let superseded: i64 = row.get("superseded");
    Ok(Connection {
        id: row.get("id"),
        source_chunk_id: row.get("source_chunk_id"),
        target_chunk_id: row.get("target_chunk_id"),
        engine: engine.parse::<EngineKind>()?,
        raw_strength: row.get("raw_strength"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
        document_id: row.get("document_id"),
        version_id: row.get("version_id"),
        run_id: row.get("run_id"),
        created_at: from_micros(row.get("created_at")),
        superseded: superseded != 0,
    })
}

fn row_to_feedback(row: &SqliteRow) -> Result<Feedback> {
    let engine: String = row.get("engine");
    let action: String = row.get("action");
    Ok(Feedback {
        id: row.get("id"),
        connection_id: row.get("connection_id"),
        engine: engine.parse::<EngineKind>()?,
        action: action.parse::<FeedbackAction>()?,
        context: FeedbackContext {
            reading_mode: row.get("reading_mode"),
            time_of_day: row.get("time_of_day"),
            document_id: row.get("document_id"),
        },
        created_at: from_micros(row.get("created_at")),
    })
}

fn row_to_adjustment(row: &SqliteRow) -> Result<WeightAdjustment> {
    let engine: String = row.get("engine");
    let reason: String = row.get("reason");
    let reason = match reason.as_str() {
        "tuner" => AdjustmentReason::Tuner,
        "user_override" => AdjustmentReason::UserOverride,
        other => anyhow::bail!("Unknown adjustment reason in database: '{}'", other),
    };
    Ok(WeightAdjustment {
        user_id: row.get("user_id"),
        engine: engine.parse::<EngineKind>()?,
        previous: row.get("previous"),
        new: row.get("new"),
        delta: row.get("delta"),
        reason,
        detail: row.get("detail"),
        at: from_micros(row.get("at")),
    })
}

fn row_to_boost(row: &SqliteRow) -> Result<Boost> {
    let engine: String = row.get("engine");
    Ok(Boost {
        engine: engine.parse::<EngineKind>()?,
        connection_id: row.get("connection_id"),
        multiplier: row.get("multiplier"),
        expires_at: from_micros(row.get("expires_at")),
    })
}

const CONNECTION_COLUMNS: &str = "id, source_chunk_id, target_chunk_id, engine, raw_strength, \
     metadata_json, document_id, version_id, run_id, created_at, superseded";

#[async_trait]
impl Store for SqliteStore {
    async fn import_chunks(
        &self,
        document_id: &str,
        version_id: &str,
        chunks: &[ChunkRecord],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM document_versions WHERE document_id = ? AND version_id = ?",
        )
        .bind(document_id)
        .bind(version_id)
        .fetch_one(&mut *tx)
        .await?;
        if existing > 0 {
            return Err(SynthesisError::VersionExists {
                document_id: document_id.to_string(),
                version_id: version_id.to_string(),
            }
            .into());
        }

        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        for batch in ids.chunks(IN_CLAUSE_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT chunk_id, document_id FROM chunks \
                 WHERE document_id != ? AND chunk_id IN ({}) \
                 ORDER BY chunk_id LIMIT 1",
                placeholders
            );
            let mut query = sqlx::query(&sql).bind(document_id);
            for id in batch {
                query = query.bind(*id);
            }
            if let Some(row) = query.fetch_optional(&mut *tx).await? {
                return Err(SynthesisError::ChunkIdTaken {
                    chunk_id: row.get("chunk_id"),
                    owner: row.get("document_id"),
                }
                .into());
            }
        }

        let seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM document_versions WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO document_versions (document_id, version_id, seq, chunk_count, imported_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(version_id)
        .bind(seq)
        .bind(chunks.len() as i64)
        .bind(to_micros(Utc::now()))
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            let mut metadata = chunk.metadata.clone();
            let blob = metadata.embedding.take().map(|v| vec_to_blob(&v));
            let metadata_json = serde_json::to_string(&metadata)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (document_id, version_id, chunk_id, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(document_id, version_id, chunk_id) DO UPDATE SET
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(document_id)
            .bind(version_id)
            .bind(&chunk.chunk_id)
            .bind(&metadata_json)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn load_corpus(&self) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT c.document_id, c.version_id, c.chunk_id, c.metadata_json, c.embedding
            FROM chunks c
            JOIN document_versions dv
              ON dv.document_id = c.document_id AND dv.version_id = c.version_id
            WHERE dv.seq = (
                SELECT MAX(seq) FROM document_versions WHERE document_id = c.document_id
            )
            ORDER BY c.document_id, c.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn document_chunks(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, version_id, chunk_id, metadata_json, embedding
            FROM chunks
            WHERE document_id = ? AND version_id = ?
            ORDER BY chunk_id
            "#,
        )
        .bind(document_id)
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn persist_run(
        &self,
        run: &DetectionRun,
        candidates: &[CandidateConnection],
    ) -> Result<PersistOutcome> {
        let mut tx = self.pool.begin().await?;

        let superseded = sqlx::query(
            r#"
            UPDATE connections
            SET superseded = 1, superseded_by_version = ?
            WHERE document_id = ? AND superseded = 0
            "#,
        )
        .bind(&run.version_id)
        .bind(&run.document_id)
        .execute(&mut *tx)
        .await?
        .rows_affected() as usize;

        let created_at = to_micros(run.started_at);
        for candidate in candidates {
            sqlx::query(
                r#"
                INSERT INTO connections (id, source_chunk_id, target_chunk_id, engine,
                                         raw_strength, metadata_json, document_id,
                                         version_id, run_id, created_at, superseded)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
                ON CONFLICT(run_id, source_chunk_id, target_chunk_id, engine) DO UPDATE SET
                    raw_strength = MAX(raw_strength, excluded.raw_strength)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&candidate.source_chunk_id)
            .bind(&candidate.target_chunk_id)
            .bind(candidate.engine.as_str())
            .bind(candidate.raw_strength)
            .bind(serde_json::to_string(&candidate.metadata)?)
            .bind(&run.document_id)
            .bind(&run.version_id)
            .bind(&run.id)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO detection_runs (id, document_id, version_id, started_at, stored, superseded)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.document_id)
        .bind(&run.version_id)
        .bind(created_at)
        .bind(candidates.len() as i64)
        .bind(superseded as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PersistOutcome {
            stored: candidates.len(),
            superseded,
        })
    }

    async fn active_connections_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Connection>> {
        let mut out = Vec::new();
        for batch in chunk_ids.chunks(IN_CLAUSE_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM connections WHERE superseded = 0 AND source_chunk_id IN ({})",
                CONNECTION_COLUMNS, placeholders
            );
            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(id);
            }
            let rows = query.fetch_all(&self.pool).await?;
            for row in &rows {
                out.push(row_to_connection(row)?);
            }
        }
        Ok(out)
    }

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>> {
        let sql = format!("SELECT {} FROM connections WHERE id = ?", CONNECTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_connection).transpose()
    }

    async fn prune_superseded(&self, before: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM connections WHERE superseded = 1 AND created_at < ?")
            .bind(to_micros(before))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn append_feedback(&self, feedback: &Feedback) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feedback (id, connection_id, engine, action, reading_mode,
                                  time_of_day, document_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&feedback.id)
        .bind(&feedback.connection_id)
        .bind(feedback.engine.as_str())
        .bind(feedback.action.as_str())
        .bind(&feedback.context.reading_mode)
        .bind(&feedback.context.time_of_day)
        .bind(&feedback.context.document_id)
        .bind(to_micros(feedback.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<Feedback>> {
        let rows = sqlx::query(
            r#"
            SELECT id, connection_id, engine, action, reading_mode, time_of_day,
                   document_id, created_at
            FROM feedback
            WHERE created_at >= ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(to_micros(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_feedback).collect()
    }

    async fn load_weight_state(&self, user_id: &str) -> Result<Option<WeightState>> {
        let row = sqlx::query(
            "SELECT config_json, last_tuned_at, updated_at FROM weight_state WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let config_json: String = row.get("config_json");
        let config: EngineConfig = serde_json::from_str(&config_json)
            .with_context(|| format!("Corrupt engine config for user {}", user_id))?;
        let last_tuned_at: Option<i64> = row.get("last_tuned_at");
        Ok(Some(WeightState {
            config,
            last_tuned_at: last_tuned_at.map(from_micros),
            updated_at: from_micros(row.get("updated_at")),
        }))
    }

    async fn save_weight_state(
        &self,
        state: &WeightState,
        adjustments: &[WeightAdjustment],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO weight_state (user_id, config_json, last_tuned_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                config_json = excluded.config_json,
                last_tuned_at = excluded.last_tuned_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.config.user_id)
        .bind(serde_json::to_string(&state.config)?)
        .bind(state.last_tuned_at.map(to_micros))
        .bind(to_micros(state.updated_at))
        .execute(&mut *tx)
        .await?;

        for adj in adjustments {
            sqlx::query(
                r#"
                INSERT INTO weight_adjustments (user_id, engine, previous, new, delta,
                                                reason, detail, at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&adj.user_id)
            .bind(adj.engine.as_str())
            .bind(adj.previous)
            .bind(adj.new)
            .bind(adj.delta)
            .bind(adj.reason.as_str())
            .bind(&adj.detail)
            .bind(to_micros(adj.at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn adjustment_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<WeightAdjustment>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, engine, previous, new, delta, reason, detail, at
            FROM weight_adjustments
            WHERE user_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_adjustment).collect()
    }

    async fn add_boost(&self, boost: &Boost) -> Result<()> {
        sqlx::query(
            "INSERT INTO boosts (engine, connection_id, multiplier, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(boost.engine.as_str())
        .bind(&boost.connection_id)
        .bind(boost.multiplier)
        .bind(to_micros(boost.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_boosts(&self, now: DateTime<Utc>) -> Result<Vec<Boost>> {
        let rows = sqlx::query(
            "SELECT engine, connection_id, multiplier, expires_at FROM boosts WHERE expires_at > ?",
        )
        .bind(to_micros(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_boost).collect()
    }

    async fn prune_expired_boosts(&self, now: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM boosts WHERE expires_at <= ?")
            .bind(to_micros(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let toml = format!("[db]\npath = \"{}\"\n", tmp.path().join("t.sqlite").display());
        let config: Config = toml::from_str(&toml).unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn chunk(id: &str, embedding: Option<Vec<f32>>) -> ChunkRecord {
        ChunkRecord {
            document_id: String::new(),
            version_id: String::new(),
            chunk_id: id.to_string(),
            metadata: ChunkMetadata {
                embedding,
                themes: vec!["memory".to_string()],
                ..Default::default()
            },
        }
    }

    fn cand(source: &str, target: &str, engine: EngineKind, strength: f64) -> CandidateConnection {
        CandidateConnection {
            source_chunk_id: source.to_string(),
            target_chunk_id: target.to_string(),
            engine,
            raw_strength: strength,
            metadata: serde_json::json!({ "k": 1 }),
        }
    }

    #[tokio::test]
    async fn test_import_round_trips_embedding_and_tracks_current_version() {
        let (_tmp, store) = open_store().await;
        store
            .import_chunks("d1", "v1", &[chunk("a", Some(vec![1.0, 0.5]))])
            .await
            .unwrap();
        store.import_chunks("d1", "v2", &[chunk("b", None)]).await.unwrap();

        let corpus = store.load_corpus().await.unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus[0].chunk_id, "b");

        let old = store.document_chunks("d1", "v1").await.unwrap();
        assert_eq!(old[0].metadata.embedding, Some(vec![1.0, 0.5]));
        assert_eq!(old[0].metadata.themes, vec!["memory".to_string()]);

        let err = store.import_chunks("d1", "v1", &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SynthesisError>(),
            Some(SynthesisError::VersionExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_import_rejects_chunk_id_owned_by_other_document() {
        let (_tmp, store) = open_store().await;
        store.import_chunks("d1", "v1", &[chunk("0", None)]).await.unwrap();

        let err = store
            .import_chunks("d2", "v1", &[chunk("1", None), chunk("0", None)])
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<SynthesisError>(),
            Some(&SynthesisError::ChunkIdTaken {
                chunk_id: "0".to_string(),
                owner: "d1".to_string(),
            })
        );
        assert!(store.document_chunks("d2", "v1").await.unwrap().is_empty());

        let versions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_versions WHERE document_id = 'd2'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(versions, 0, "rejected import leaves no version row");

        store.import_chunks("d1", "v2", &[chunk("0", None)]).await.unwrap();
        store.import_chunks("d2", "v1", &[chunk("1", None)]).await.unwrap();
        assert_eq!(store.load_corpus().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_prune_expired_boosts() {
        let (_tmp, store) = open_store().await;
        let now = Utc::now();
        for (id, hours) in [("c1", -2), ("c2", 3)] {
            store
                .add_boost(&Boost {
                    engine: EngineKind::Structural,
                    connection_id: id.to_string(),
                    multiplier: 1.5,
                    expires_at: now + chrono::Duration::hours(hours),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.prune_expired_boosts(now).await.unwrap(), 1);
        assert_eq!(store.prune_expired_boosts(now).await.unwrap(), 0);
        assert_eq!(store.active_boosts(now).await.unwrap()[0].connection_id, "c2");
    }

    #[tokio::test]
    async fn test_persist_run_supersedes_previous_batch() {
        let (_tmp, store) = open_store().await;
        let first = DetectionRun::new("d1", "v1");
        store
            .persist_run(
                &first,
                &[
                    cand("a", "x", EngineKind::Semantic, 0.5),
                    cand("a", "x", EngineKind::Emotional, 0.4),
                ],
            )
            .await
            .unwrap();

        let second = DetectionRun::new("d1", "v2");
        let outcome = store
            .persist_run(&second, &[cand("b", "x", EngineKind::Semantic, 0.9)])
            .await
            .unwrap();
        assert_eq!(outcome.superseded, 2);

        let ids = vec!["a".to_string(), "b".to_string()];
        let active = store.active_connections_for_chunks(&ids).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version_id, "v2");
        assert_eq!(active[0].metadata["k"], 1);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM connections")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(total, 3, "superseded rows are retained");

        let pruned = store
            .prune_superseded(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(pruned, 2);
    }

    #[tokio::test]
    async fn test_feedback_and_weight_state_round_trip() {
        let (_tmp, store) = open_store().await;
        let now = Utc::now();
        let feedback = Feedback {
            id: "f1".to_string(),
            connection_id: "c1".to_string(),
            engine: EngineKind::Contradiction,
            action: FeedbackAction::Star,
            context: FeedbackContext {
                reading_mode: Some("focused".to_string()),
                time_of_day: None,
                document_id: Some("d1".to_string()),
            },
            created_at: now,
        };
        store.append_feedback(&feedback).await.unwrap();
        let loaded = store
            .feedback_since(now - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].action, FeedbackAction::Star);
        assert_eq!(loaded[0].context.reading_mode.as_deref(), Some("focused"));

        let mut state = WeightState::new(EngineConfig::new("u"), now);
        state.last_tuned_at = Some(now);
        state.config.weights.insert(EngineKind::Temporal, 0.3);
        store.save_weight_state(&state, &[]).await.unwrap();
        let back = store.load_weight_state("u").await.unwrap().unwrap();
        assert_eq!(back.config, state.config);
        assert_eq!(back.last_tuned_at.map(to_micros), Some(to_micros(now)));
    }
}
