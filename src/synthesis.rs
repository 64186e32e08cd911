//! Synthesis orchestrator: `detect_all(document, version)`.
//!
//! # Pipeline
//!
//! ```text
//! document_chunks ─┐
//!                  ├─▶ CorpusIndex ─▶ fan-out (one blocking task per engine)
//! load_corpus ─────┘                        │  per-engine timeout
//!                                           ▼
//!                         fan-in ─▶ apply_limits ─▶ persist_run
//! ```
//!
//! Engines run concurrently on the blocking pool, each reading the same
//! immutable `Arc<CorpusIndex>` and writing to its own output list. A
//! panicking or slow engine is reported as an [`EngineFailure`] and its
//! results are dropped; the other engines' results are still stored.
//!
//! Everything from loading the chunks through limiting is bounded by the
//! overall timeout. When it fires the run is abandoned and nothing is
//! persisted.
//!
//! Runs for the same document version are serialized by a per-key async
//! mutex; different documents proceed in parallel. A key's mutex is dropped
//! from the table once no run holds or waits on it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinSet;

use synthesis_core::corpus::CorpusIndex;
use synthesis_core::engines::{run_detector, EngineRegistry, EngineThresholds};
use synthesis_core::error::{EngineError, SynthesisError};
use synthesis_core::limits::apply_limits;
use synthesis_core::models::{CandidateConnection, DetectionRun, EngineKind};
use synthesis_core::store::Store;
use synthesis_core::weights::EngineConfig;

use crate::config::Config;

/// One engine that did not contribute to a run.
#[derive(Debug, Clone, Serialize)]
pub struct EngineFailure {
    pub engine: EngineKind,
    pub timed_out: bool,
    pub message: String,
}

impl From<EngineError> for EngineFailure {
    fn from(err: EngineError) -> Self {
        Self {
            engine: err.engine(),
            timed_out: matches!(err, EngineError::TimedOut { .. }),
            message: err.to_string(),
        }
    }
}

/// Outcome of a detection run.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub run_id: String,
    pub document_id: String,
    pub version_id: String,
    /// Candidates produced by the engines before limiting.
    pub candidates: usize,
    /// Rows written for this run.
    pub stored: usize,
    /// Previously active connections of the document marked superseded.
    pub superseded: usize,
    pub per_engine: BTreeMap<EngineKind, usize>,
    pub failures: Vec<EngineFailure>,
    pub elapsed_ms: u64,
    /// The persisted batch, carrying raw strengths.
    pub connections: Vec<CandidateConnection>,
}

type EngineOutcome = (EngineKind, Duration, Result<Vec<CandidateConnection>, EngineError>);

type RunLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive hold on one document version's run lock. Dropping it releases
/// the lock and removes the table entry when nobody else is waiting.
struct RunSlot<'a> {
    locks: &'a RunLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let lock = Arc::clone(OwnedMutexGuard::mutex(&guard));
        drop(guard);
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only taken under the table lock, so the count is exact:
        // one for the table entry and one for `lock`.
        let idle = locks
            .get(&self.key)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(&self.key);
        }
    }
}

/// Limited candidates and engine failures of a run, ready to persist.
struct Gathered {
    produced: usize,
    limited: Vec<CandidateConnection>,
    failures: Vec<EngineFailure>,
}

pub struct Synthesizer {
    store: Arc<dyn Store>,
    registry: EngineRegistry,
    thresholds: EngineThresholds,
    engine_timeout: Duration,
    overall_timeout: Duration,
    run_locks: RunLocks,
}

impl Synthesizer {
    pub fn new(store: Arc<dyn Store>, registry: EngineRegistry, thresholds: EngineThresholds) -> Self {
        Self {
            store,
            registry,
            thresholds,
            engine_timeout: Duration::from_secs(5),
            overall_timeout: Duration::from_secs(30),
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The built-in engines with thresholds and timeouts from `config`.
    pub fn from_config(store: Arc<dyn Store>, config: &Config) -> Self {
        Self::new(store, EngineRegistry::builtin(), config.detection.thresholds())
            .with_timeouts(config.detection.engine_timeout(), config.detection.overall_timeout())
    }

    pub fn with_timeouts(mut self, engine_timeout: Duration, overall_timeout: Duration) -> Self {
        self.engine_timeout = engine_timeout;
        self.overall_timeout = overall_timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn enter_run(&self, document_id: &str, version_id: &str) -> RunSlot<'_> {
        let key = format!("{}\u{1f}{}", document_id, version_id);
        let lock = {
            let mut locks = self.run_locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        RunSlot {
            locks: &self.run_locks,
            key,
            guard: Some(guard),
        }
    }

    /// Detect, limit, and persist connections for one document version.
    ///
    /// Returns [`SynthesisError::NoChunks`] if the version has no chunks and
    /// [`SynthesisError::DetectionTimedOut`] if the overall timeout fires.
    /// Individual engine failures are reported in the result, not as errors.
    pub async fn detect_all(
        &self,
        document_id: &str,
        version_id: &str,
        config: &EngineConfig,
    ) -> Result<DetectionReport> {
        let _slot = self.enter_run(document_id, version_id).await;

        let started = Instant::now();
        let run = DetectionRun::new(document_id, version_id);
        let gathered = match tokio::time::timeout(
            self.overall_timeout,
            self.gather(&run, config),
        )
        .await
        {
            Ok(gathered) => gathered?,
            Err(_) => {
                // Dropping the gather future drops its JoinSet, which aborts
                // the engine tasks still running.
                let after_ms = self.overall_timeout.as_millis() as u64;
                tracing::warn!(
                    run_id = %run.id,
                    document_id,
                    version_id,
                    after_ms,
                    "detection abandoned: overall timeout"
                );
                return Err(SynthesisError::DetectionTimedOut {
                    document_id: document_id.to_string(),
                    version_id: version_id.to_string(),
                    after_ms,
                }
                .into());
            }
        };
        let Gathered {
            produced,
            limited,
            failures,
        } = gathered;
        let outcome = self.store.persist_run(&run, &limited).await?;

        let mut per_engine: BTreeMap<EngineKind, usize> = BTreeMap::new();
        for c in &limited {
            *per_engine.entry(c.engine).or_default() += 1;
        }

        let report = DetectionReport {
            run_id: run.id,
            document_id: document_id.to_string(),
            version_id: version_id.to_string(),
            candidates: produced,
            stored: outcome.stored,
            superseded: outcome.superseded,
            per_engine,
            failures,
            elapsed_ms: started.elapsed().as_millis() as u64,
            connections: limited,
        };
        tracing::info!(
            run_id = %report.run_id,
            document_id,
            version_id,
            candidates = report.candidates,
            stored = report.stored,
            superseded = report.superseded,
            failures = report.failures.len(),
            elapsed_ms = report.elapsed_ms,
            "detection run complete"
        );
        Ok(report)
    }

    /// Load chunks and corpus, fan out to the enabled engines, then limit.
    async fn gather(&self, run: &DetectionRun, config: &EngineConfig) -> Result<Gathered> {
        let (document_id, version_id) = (run.document_id.as_str(), run.version_id.as_str());
        let sources = self.store.document_chunks(document_id, version_id).await?;
        if sources.is_empty() {
            return Err(SynthesisError::NoChunks {
                document_id: document_id.to_string(),
                version_id: version_id.to_string(),
            }
            .into());
        }

        // The version being detected replaces whatever version of the same
        // document is current in the corpus.
        let mut records: Vec<_> = self
            .store
            .load_corpus()
            .await?
            .into_iter()
            .filter(|c| c.document_id != document_id)
            .collect();
        records.extend(sources.iter().cloned());
        let corpus = Arc::new(CorpusIndex::new(records));
        let sources = Arc::new(sources);

        tracing::debug!(
            run_id = %run.id,
            document_id,
            version_id,
            sources = sources.len(),
            corpus = corpus.len(),
            "starting detection run"
        );

        let mut tasks = JoinSet::new();
        for engine in self.registry.engines() {
            if !config.is_enabled(engine) {
                continue;
            }
            let Some(detector) = self.registry.get(engine) else {
                continue;
            };
            let sources = Arc::clone(&sources);
            let corpus = Arc::clone(&corpus);
            let thresholds = self.thresholds.clone();
            let engine_timeout = self.engine_timeout;

            tasks.spawn(async move {
                let engine_started = Instant::now();
                let handle = tokio::task::spawn_blocking(move || {
                    run_detector(engine, detector, &sources, &corpus, &thresholds)
                });
                let result = match tokio::time::timeout(engine_timeout, handle).await {
                    Ok(Ok(candidates)) => Ok(candidates),
                    Ok(Err(join_err)) => Err(EngineError::Failed {
                        engine,
                        reason: panic_reason(join_err),
                    }),
                    Err(_) => Err(EngineError::TimedOut {
                        engine,
                        after_ms: engine_timeout.as_millis() as u64,
                    }),
                };
                (engine, engine_started.elapsed(), result)
            });
        }

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        for (engine, elapsed, result) in collect(&mut tasks).await {
            match result {
                Ok(found) => {
                    tracing::debug!(
                        engine = %engine,
                        candidates = found.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "engine finished"
                    );
                    candidates.extend(found);
                }
                Err(err) => {
                    tracing::warn!(engine = %engine, error = %err, "engine failed; excluding its results");
                    failures.push(EngineFailure::from(err));
                }
            }
        }
        failures.sort_by_key(|f| config.priority_rank(f.engine));

        let produced = candidates.len();
        let limited = apply_limits(candidates, config);
        Ok(Gathered {
            produced,
            limited,
            failures,
        })
    }
}

async fn collect(tasks: &mut JoinSet<EngineOutcome>) -> Vec<EngineOutcome> {
    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => tracing::warn!(error = %err, "engine task aborted"),
        }
    }
    outcomes
}

fn panic_reason(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// CLI entry point for `synth detect`.
pub async fn run_detect(config: &Config, document_id: &str, version_id: &str) -> Result<()> {
    let store = crate::sqlite_store::open_store(config).await?;
    let state = crate::query::load_or_init_state(store.as_ref(), config, &config.user.default_id)
        .await?;
    let synthesizer = Synthesizer::from_config(store, config);
    let report = synthesizer
        .detect_all(document_id, version_id, &state.config)
        .await?;

    println!(
        "Detected {} candidates for {}@{}; stored {}, superseded {} ({} ms)",
        report.candidates,
        report.document_id,
        report.version_id,
        report.stored,
        report.superseded,
        report.elapsed_ms
    );
    for (engine, count) in &report.per_engine {
        println!("  {:<16} {:>5}", engine.as_str(), count);
    }
    for failure in &report.failures {
        println!("  FAILED {:<9} {}", failure.engine.as_str(), failure.message);
    }
    Ok(())
}
