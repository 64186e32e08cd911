//! Schema creation.
//!
//! Every statement is `IF NOT EXISTS`, so `synth init` can be run any number
//! of times. Timestamps are stored as INTEGER microseconds since the epoch.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One row per imported document version; `seq` orders versions so the
    // highest one is the document's current version.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            document_id TEXT NOT NULL,
            version_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            imported_at INTEGER NOT NULL,
            PRIMARY KEY (document_id, version_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            document_id TEXT NOT NULL,
            version_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            PRIMARY KEY (document_id, version_id, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detection_runs (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            version_id TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            stored INTEGER NOT NULL,
            superseded INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS connections (
            id TEXT PRIMARY KEY,
            source_chunk_id TEXT NOT NULL,
            target_chunk_id TEXT NOT NULL,
            engine TEXT NOT NULL,
            raw_strength REAL NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            document_id TEXT NOT NULL,
            version_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            superseded INTEGER NOT NULL DEFAULT 0,
            superseded_by_version TEXT,
            UNIQUE (run_id, source_chunk_id, target_chunk_id, engine)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedback (
            id TEXT PRIMARY KEY,
            connection_id TEXT NOT NULL,
            engine TEXT NOT NULL,
            action TEXT NOT NULL,
            reading_mode TEXT,
            time_of_day TEXT,
            document_id TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weight_state (
            user_id TEXT PRIMARY KEY,
            config_json TEXT NOT NULL,
            last_tuned_at INTEGER,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weight_adjustments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            engine TEXT NOT NULL,
            previous REAL NOT NULL,
            new REAL NOT NULL,
            delta REAL NOT NULL,
            reason TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS boosts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            engine TEXT NOT NULL,
            connection_id TEXT NOT NULL,
            multiplier REAL NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_connections_source_active ON connections(source_chunk_id, superseded)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_connections_document ON connections(document_id, superseded)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_feedback_created_at ON feedback(created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_boosts_expires_at ON boosts(expires_at)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_adjustments_user ON weight_adjustments(user_id, id DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
