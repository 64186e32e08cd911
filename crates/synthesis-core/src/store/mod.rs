//! Storage abstraction for connection synthesis.
//!
//! The [`Store`] trait covers every persistence operation the pipeline
//! needs: the chunk hand-off, versioned connection batches, the feedback
//! log, weight state with its audit trail, and starred boosts.
//!
//! Connection batches are append-plus-supersede: persisting a detection run
//! marks the document's previously active connections superseded and appends
//! the new batch in one atomic step. Nothing is updated in place except the
//! superseded flag, and superseded rows stay until [`Store::prune_superseded`]
//! removes them.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Boost, CandidateConnection, ChunkRecord, Connection, DetectionRun, Feedback, PersistOutcome,
};
use crate::weights::{WeightAdjustment, WeightState};

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`import_chunks`](Store::import_chunks) | Register a new document version and its chunks |
/// | [`load_corpus`](Store::load_corpus) | Chunks of the current version of every document |
/// | [`document_chunks`](Store::document_chunks) | Chunks of one document version |
/// | [`persist_run`](Store::persist_run) | Supersede old connections and append a run's batch |
/// | [`active_connections_for_chunks`](Store::active_connections_for_chunks) | Read path for ranking |
/// | [`append_feedback`](Store::append_feedback) | Append-only feedback log |
/// | [`save_weight_state`](Store::save_weight_state) | Last-write-wins state row plus audit entries |
#[async_trait]
pub trait Store: Send + Sync {
    /// Register a document version. Fails with
    /// [`SynthesisError::VersionExists`](crate::error::SynthesisError::VersionExists)
    /// if the version was already imported, and with
    /// [`SynthesisError::ChunkIdTaken`](crate::error::SynthesisError::ChunkIdTaken)
    /// if a chunk id is already used by a different document. Nothing is
    /// written on failure. The new version becomes the document's current one.
    async fn import_chunks(
        &self,
        document_id: &str,
        version_id: &str,
        chunks: &[ChunkRecord],
    ) -> Result<usize>;

    /// Every chunk belonging to the current version of its document.
    async fn load_corpus(&self) -> Result<Vec<ChunkRecord>>;

    async fn document_chunks(&self, document_id: &str, version_id: &str)
        -> Result<Vec<ChunkRecord>>;

    /// Persist a run's limited candidates. Callers serialize runs per
    /// document version.
    async fn persist_run(
        &self,
        run: &DetectionRun,
        candidates: &[CandidateConnection],
    ) -> Result<PersistOutcome>;

    /// Active (non-superseded) connections whose source is in `chunk_ids`.
    async fn active_connections_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Connection>>;

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>>;

    /// Delete superseded connections created before `before`. Returns the
    /// number removed.
    async fn prune_superseded(&self, before: DateTime<Utc>) -> Result<usize>;

    async fn append_feedback(&self, feedback: &Feedback) -> Result<()>;

    /// Feedback created at or after `since`, oldest first.
    async fn feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<Feedback>>;

    async fn load_weight_state(&self, user_id: &str) -> Result<Option<WeightState>>;

    /// Overwrite the user's state row and append the audit entries.
    async fn save_weight_state(
        &self,
        state: &WeightState,
        adjustments: &[WeightAdjustment],
    ) -> Result<()>;

    /// Most recent adjustments first.
    async fn adjustment_history(&self, user_id: &str, limit: usize)
        -> Result<Vec<WeightAdjustment>>;

    async fn add_boost(&self, boost: &Boost) -> Result<()>;

    async fn active_boosts(&self, now: DateTime<Utc>) -> Result<Vec<Boost>>;

    /// Delete boosts that expired at or before `now`. Returns the number removed.
    async fn prune_expired_boosts(&self, now: DateTime<Utc>) -> Result<usize>;
}
