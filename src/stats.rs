//! Database statistics.
//!
//! `synth stats` prints corpus size, connection counts per engine (active
//! and superseded), feedback counts per engine, and when the last detection
//! run happened. Handy for checking that imports and detection runs landed.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::from_micros;

#[derive(Debug, Default, Clone, Serialize)]
pub struct EngineStats {
    pub active: i64,
    pub superseded: i64,
    pub validated: i64,
    pub rejected: i64,
    pub starred: i64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Stats {
    pub documents: i64,
    pub versions: i64,
    pub chunks: i64,
    pub embedded_chunks: i64,
    pub detection_runs: i64,
    pub last_run_at: Option<i64>,
    pub per_engine: BTreeMap<String, EngineStats>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    let mut stats = Stats {
        documents: sqlx::query_scalar("SELECT COUNT(DISTINCT document_id) FROM document_versions")
            .fetch_one(pool)
            .await?,
        versions: sqlx::query_scalar("SELECT COUNT(*) FROM document_versions")
            .fetch_one(pool)
            .await?,
        chunks: sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await?,
        embedded_chunks: sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")
            .fetch_one(pool)
            .await?,
        detection_runs: sqlx::query_scalar("SELECT COUNT(*) FROM detection_runs")
            .fetch_one(pool)
            .await?,
        last_run_at: sqlx::query_scalar("SELECT MAX(started_at) FROM detection_runs")
            .fetch_one(pool)
            .await?,
        per_engine: BTreeMap::new(),
    };

    let connection_rows = sqlx::query(
        r#"
        SELECT engine,
               SUM(CASE WHEN superseded = 0 THEN 1 ELSE 0 END) AS active,
               SUM(CASE WHEN superseded = 1 THEN 1 ELSE 0 END) AS superseded
        FROM connections
        GROUP BY engine
        "#,
    )
    .fetch_all(pool)
    .await?;
    for row in &connection_rows {
        let entry = stats.per_engine.entry(row.get("engine")).or_default();
        entry.active = row.get("active");
        entry.superseded = row.get("superseded");
    }

    let feedback_rows = sqlx::query(
        "SELECT engine, action, COUNT(*) AS n FROM feedback GROUP BY engine, action",
    )
    .fetch_all(pool)
    .await?;
    for row in &feedback_rows {
        let action: String = row.get("action");
        let n: i64 = row.get("n");
        let entry = stats.per_engine.entry(row.get("engine")).or_default();
        match action.as_str() {
            "validate" => entry.validated = n,
            "reject" => entry.rejected = n,
            "star" => entry.starred = n,
            _ => {}
        }
    }

    Ok(stats)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Connection Synthesis: Database Stats");
    println!("=====================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!(
        "  Documents:   {} ({} versions)",
        stats.documents, stats.versions
    );
    println!(
        "  Chunks:      {} ({} with embeddings)",
        stats.chunks, stats.embedded_chunks
    );
    println!(
        "  Runs:        {} (last: {})",
        stats.detection_runs,
        stats
            .last_run_at
            .map(|ts| from_micros(ts).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.per_engine.is_empty() {
        println!();
        println!("  By engine:");
        println!(
            "  {:<16} {:>8} {:>10} {:>9} {:>8} {:>7}",
            "ENGINE", "ACTIVE", "SUPERSEDED", "VALIDATED", "REJECTED", "STARRED"
        );
        println!("  {}", "-".repeat(64));
        for (engine, s) in &stats.per_engine {
            println!(
                "  {:<16} {:>8} {:>10} {:>9} {:>8} {:>7}",
                engine, s.active, s.superseded, s.validated, s.rejected, s.starred
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
