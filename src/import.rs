//! Chunk hand-off import.
//!
//! The document-processing side delivers chunks as JSON Lines, one chunk per
//! line:
//!
//! ```json
//! {"document_id":"d1","version_id":"v2","chunk_id":"d1-v2-0","metadata":{"themes":["memory"]}}
//! ```
//!
//! Lines are grouped by `(document_id, version_id)` in first-seen order and
//! each group is registered as one new, immutable document version. Blank
//! lines are skipped. The whole file is parsed before anything is written.
//!
//! Chunk ids are library-wide: two documents may not share one, either
//! within the file or against what the store already holds.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use synthesis_core::models::ChunkRecord;
use synthesis_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::open_store;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line}: {field} must not be empty")]
    MissingField { line: usize, field: &'static str },

    #[error("line {line}: duplicate chunk id '{chunk_id}' in {document_id}@{version_id}")]
    DuplicateChunk {
        line: usize,
        document_id: String,
        version_id: String,
        chunk_id: String,
    },

    #[error("line {line}: chunk id '{chunk_id}' is already used by document {owner}")]
    ChunkIdReused {
        line: usize,
        chunk_id: String,
        owner: String,
    },
}

/// One document version's worth of chunks.
#[derive(Debug, Clone)]
pub struct VersionBatch {
    pub document_id: String,
    pub version_id: String,
    pub chunks: Vec<ChunkRecord>,
}

/// Parse JSONL input into per-version batches.
pub fn parse_jsonl(input: &str) -> Result<Vec<VersionBatch>, ImportError> {
    let mut batches: Vec<VersionBatch> = Vec::new();
    let mut owners: HashMap<String, String> = HashMap::new();
    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord =
            serde_json::from_str(raw).map_err(|source| ImportError::Parse { line, source })?;
        for (field, value) in [
            ("document_id", &record.document_id),
            ("version_id", &record.version_id),
            ("chunk_id", &record.chunk_id),
        ] {
            if value.trim().is_empty() {
                return Err(ImportError::MissingField { line, field });
            }
        }

        match owners.get(&record.chunk_id) {
            Some(owner) if *owner != record.document_id => {
                return Err(ImportError::ChunkIdReused {
                    line,
                    chunk_id: record.chunk_id,
                    owner: owner.clone(),
                });
            }
            Some(_) => {}
            None => {
                owners.insert(record.chunk_id.clone(), record.document_id.clone());
            }
        }

        let pos = batches
            .iter()
            .position(|b| b.document_id == record.document_id && b.version_id == record.version_id);
        let batch = match pos {
            Some(i) => &mut batches[i],
            None => {
                batches.push(VersionBatch {
                    document_id: record.document_id.clone(),
                    version_id: record.version_id.clone(),
                    chunks: Vec::new(),
                });
                let last = batches.len() - 1;
                &mut batches[last]
            }
        };
        if batch.chunks.iter().any(|c| c.chunk_id == record.chunk_id) {
            return Err(ImportError::DuplicateChunk {
                line,
                document_id: record.document_id,
                version_id: record.version_id,
                chunk_id: record.chunk_id,
            });
        }
        batch.chunks.push(record);
    }
    Ok(batches)
}

/// Register every batch with the store. Stops at the first version that
/// already exists or that reuses another document's chunk id.
pub async fn import_batches(store: &dyn Store, batches: &[VersionBatch]) -> Result<usize> {
    let mut total = 0;
    for batch in batches {
        let n = store
            .import_chunks(&batch.document_id, &batch.version_id, &batch.chunks)
            .await?;
        tracing::info!(
            document_id = %batch.document_id,
            version_id = %batch.version_id,
            chunks = n,
            "imported document version"
        );
        total += n;
    }
    Ok(total)
}

pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let batches = parse_jsonl(&input).with_context(|| format!("Invalid input {}", path.display()))?;

    let store = open_store(config).await?;
    let total = import_batches(store.as_ref(), &batches).await?;

    println!(
        "Imported {} chunks across {} document versions.",
        total,
        batches.len()
    );
    for batch in &batches {
        println!(
            "  {}@{}: {} chunks",
            batch.document_id,
            batch.version_id,
            batch.chunks.len()
        );
    }
    Ok(())
}
