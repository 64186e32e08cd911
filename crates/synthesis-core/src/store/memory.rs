//! In-memory [`Store`] implementation for testing.
//!
//! Connections live in an append-only arena; superseding a batch only adds
//! arena slots to the superseded index. Pruning tombstones the slot so the
//! indices of live entries never move. Everything sits behind
//! `std::sync::RwLock`.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SynthesisError;
use crate::models::{
    Boost, CandidateConnection, ChunkRecord, Connection, DetectionRun, Feedback, PersistOutcome,
};
use crate::weights::{WeightAdjustment, WeightState};

use super::Store;

#[derive(Default)]
struct ConnectionLog {
    arena: Vec<Option<Connection>>,
    superseded: HashSet<usize>,
}

impl ConnectionLog {
    fn view(&self, slot: usize) -> Option<Connection> {
        self.arena[slot].as_ref().map(|c| {
            let mut c = c.clone();
            c.superseded = self.superseded.contains(&slot);
            c
        })
    }
}

/// In-memory store for tests and embedding in other processes.
pub struct InMemoryStore {
    /// document id -> version ids in import order; the last one is current.
    versions: RwLock<HashMap<String, Vec<String>>>,
    chunks: RwLock<Vec<ChunkRecord>>,
    connections: RwLock<ConnectionLog>,
    feedback: RwLock<Vec<Feedback>>,
    weights: RwLock<HashMap<String, WeightState>>,
    adjustments: RwLock<Vec<WeightAdjustment>>,
    boosts: RwLock<Vec<Boost>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
            connections: RwLock::new(ConnectionLog::default()),
            feedback: RwLock::new(Vec::new()),
            weights: RwLock::new(HashMap::new()),
            adjustments: RwLock::new(Vec::new()),
            boosts: RwLock::new(Vec::new()),
        }
    }

    /// Every stored connection, superseded ones included.
    pub fn all_connections(&self) -> Vec<Connection> {
        let log = self.connections.read().unwrap();
        (0..log.arena.len()).filter_map(|slot| log.view(slot)).collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn import_chunks(
        &self,
        document_id: &str,
        version_id: &str,
        chunks: &[ChunkRecord],
    ) -> Result<usize> {
        let mut versions = self.versions.write().unwrap();
        let mut stored = self.chunks.write().unwrap();
        if versions
            .get(document_id)
            .is_some_and(|known| known.iter().any(|v| v == version_id))
        {
            return Err(SynthesisError::VersionExists {
                document_id: document_id.to_string(),
                version_id: version_id.to_string(),
            }
            .into());
        }
        let incoming: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        if let Some(taken) = stored
            .iter()
            .find(|c| c.document_id != document_id && incoming.contains(c.chunk_id.as_str()))
        {
            return Err(SynthesisError::ChunkIdTaken {
                chunk_id: taken.chunk_id.clone(),
                owner: taken.document_id.clone(),
            }
            .into());
        }
        versions
            .entry(document_id.to_string())
            .or_default()
            .push(version_id.to_string());

        for chunk in chunks {
            let mut chunk = chunk.clone();
            chunk.document_id = document_id.to_string();
            chunk.version_id = version_id.to_string();
            stored.push(chunk);
        }
        Ok(chunks.len())
    }

    async fn load_corpus(&self) -> Result<Vec<ChunkRecord>> {
        let versions = self.versions.read().unwrap();
        let chunks = self.chunks.read().unwrap();
        Ok(chunks
            .iter()
            .filter(|c| {
                versions
                    .get(&c.document_id)
                    .and_then(|v| v.last())
                    .is_some_and(|current| *current == c.version_id)
            })
            .cloned()
            .collect())
    }

    async fn document_chunks(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> Result<Vec<ChunkRecord>> {
        let chunks = self.chunks.read().unwrap();
        Ok(chunks
            .iter()
            .filter(|c| c.document_id == document_id && c.version_id == version_id)
            .cloned()
            .collect())
    }

    async fn persist_run(
        &self,
        run: &DetectionRun,
        candidates: &[CandidateConnection],
    ) -> Result<PersistOutcome> {
        let mut log = self.connections.write().unwrap();

        let stale: Vec<usize> = log
            .arena
            .iter()
            .enumerate()
            .filter(|(slot, c)| {
                c.as_ref()
                    .is_some_and(|c| c.document_id == run.document_id)
                    && !log.superseded.contains(slot)
            })
            .map(|(slot, _)| slot)
            .collect();
        let superseded = stale.len();
        log.superseded.extend(stale);

        for candidate in candidates {
            log.arena.push(Some(Connection {
                id: uuid::Uuid::new_v4().to_string(),
                source_chunk_id: candidate.source_chunk_id.clone(),
                target_chunk_id: candidate.target_chunk_id.clone(),
                engine: candidate.engine,
                raw_strength: candidate.raw_strength,
                metadata: candidate.metadata.clone(),
                document_id: run.document_id.clone(),
                version_id: run.version_id.clone(),
                run_id: run.id.clone(),
                created_at: run.started_at,
                superseded: false,
            }));
        }

        Ok(PersistOutcome {
            stored: candidates.len(),
            superseded,
        })
    }

    async fn active_connections_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Connection>> {
        let wanted: HashSet<&str> = chunk_ids.iter().map(|s| s.as_str()).collect();
        let log = self.connections.read().unwrap();
        Ok((0..log.arena.len())
            .filter(|slot| !log.superseded.contains(slot))
            .filter_map(|slot| log.view(slot))
            .filter(|c| wanted.contains(c.source_chunk_id.as_str()))
            .collect())
    }

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>> {
        let log = self.connections.read().unwrap();
        Ok((0..log.arena.len())
            .filter_map(|slot| log.view(slot))
            .find(|c| c.id == id))
    }

    async fn prune_superseded(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut log = self.connections.write().unwrap();
        let doomed: Vec<usize> = log
            .superseded
            .iter()
            .copied()
            .filter(|slot| {
                log.arena[*slot]
                    .as_ref()
                    .is_some_and(|c| c.created_at < before)
            })
            .collect();
        for slot in &doomed {
            log.arena[*slot] = None;
            log.superseded.remove(slot);
        }
        Ok(doomed.len())
    }

    async fn append_feedback(&self, feedback: &Feedback) -> Result<()> {
        self.feedback.write().unwrap().push(feedback.clone());
        Ok(())
    }

    async fn feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<Feedback>> {
        let log = self.feedback.read().unwrap();
        let mut out: Vec<Feedback> = log
            .iter()
            .filter(|f| f.created_at >= since)
            .cloned()
            .collect();
        out.sort_by_key(|f| f.created_at);
        Ok(out)
    }

    async fn load_weight_state(&self, user_id: &str) -> Result<Option<WeightState>> {
        Ok(self.weights.read().unwrap().get(user_id).cloned())
    }

    async fn save_weight_state(
        &self,
        state: &WeightState,
        adjustments: &[WeightAdjustment],
    ) -> Result<()> {
        self.weights
            .write()
            .unwrap()
            .insert(state.config.user_id.clone(), state.clone());
        self.adjustments
            .write()
            .unwrap()
            .extend(adjustments.iter().cloned());
        Ok(())
    }

    async fn adjustment_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<WeightAdjustment>> {
        let log = self.adjustments.read().unwrap();
        Ok(log
            .iter()
            .rev()
            .filter(|a| a.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn add_boost(&self, boost: &Boost) -> Result<()> {
        self.boosts.write().unwrap().push(boost.clone());
        Ok(())
    }

    async fn active_boosts(&self, now: DateTime<Utc>) -> Result<Vec<Boost>> {
        Ok(self
            .boosts
            .read()
            .unwrap()
            .iter()
            .filter(|b| b.is_active(now))
            .cloned()
            .collect())
    }

    async fn prune_expired_boosts(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut boosts = self.boosts.write().unwrap();
        let before = boosts.len();
        boosts.retain(|b| b.is_active(now));
        Ok(before - boosts.len())
    }
}
