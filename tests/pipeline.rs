//! In-process tests of the detection orchestrator and the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

use connection_synthesis::config::Config;
use connection_synthesis::server::{router, AppState};
use connection_synthesis::sqlite_store::SqliteStore;
use connection_synthesis::synthesis::Synthesizer;
use connection_synthesis::{db, migrate};
use synthesis_core::corpus::CorpusIndex;
use synthesis_core::engines::{EngineRegistry, EngineThresholds};
use synthesis_core::error::SynthesisError;
use synthesis_core::models::{
    Boost, CandidateConnection, ChunkMetadata, ChunkRecord, Connection, DetectionRun, EngineKind,
    Feedback, PersistOutcome, RawCandidate,
};
use synthesis_core::store::memory::InMemoryStore;
use synthesis_core::store::Store;
use synthesis_core::weights::{EngineConfig, WeightAdjustment, WeightState};

fn chunk(doc: &str, version: &str, id: &str, embedding: [f32; 2], tones: &[&str]) -> ChunkRecord {
    ChunkRecord {
        document_id: doc.to_string(),
        version_id: version.to_string(),
        chunk_id: id.to_string(),
        metadata: ChunkMetadata {
            embedding: Some(embedding.to_vec()),
            emotional_tones: tones.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        },
    }
}

async fn seeded_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store
        .import_chunks(
            "d1",
            "v1",
            &[
                chunk("d1", "v1", "d1-c0", [1.0, 0.0], &["melancholic"]),
                chunk("d1", "v1", "d1-c1", [0.0, 1.0], &["hopeful"]),
            ],
        )
        .await
        .unwrap();
    store
        .import_chunks(
            "d2",
            "v1",
            &[
                chunk("d2", "v1", "d2-c0", [0.95, 0.05], &["melancholic", "tense"]),
                chunk("d2", "v1", "d2-c1", [0.1, 0.9], &["hopeful"]),
            ],
        )
        .await
        .unwrap();
    store
}

fn panicking(_: &ChunkRecord, _: &CorpusIndex, _: &EngineThresholds) -> Vec<RawCandidate> {
    panic!("rhythm table corrupt")
}

fn slow(_: &ChunkRecord, _: &CorpusIndex, _: &EngineThresholds) -> Vec<RawCandidate> {
    std::thread::sleep(Duration::from_millis(400));
    Vec::new()
}

fn synthesizer(store: Arc<InMemoryStore>, registry: EngineRegistry) -> Synthesizer {
    Synthesizer::new(store, registry, EngineThresholds::default())
}

#[tokio::test]
async fn test_detect_all_stores_each_engine_batch() {
    let store = seeded_store().await;
    let synth = synthesizer(store.clone(), EngineRegistry::builtin());

    let report = synth
        .detect_all("d1", "v1", &EngineConfig::new("u"))
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.stored, report.connections.len());
    assert_eq!(report.superseded, 0);
    assert!(report.per_engine.contains_key(&EngineKind::Semantic));
    assert!(report.per_engine.contains_key(&EngineKind::Emotional));

    // Only chunks of the detected document are sources.
    assert!(report
        .connections
        .iter()
        .all(|c| c.source_chunk_id.starts_with("d1-")));
    // Semantic never links within a document.
    assert!(report
        .connections
        .iter()
        .filter(|c| c.engine == EngineKind::Semantic)
        .all(|c| c.target_chunk_id.starts_with("d2-")));
}

#[tokio::test]
async fn test_panicking_engine_does_not_block_others() {
    let store = seeded_store().await;
    let mut registry = EngineRegistry::builtin();
    registry.register(EngineKind::Temporal, panicking);
    let synth = synthesizer(store.clone(), registry);

    let report = synth
        .detect_all("d1", "v1", &EngineConfig::new("u"))
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.engine, EngineKind::Temporal);
    assert!(!failure.timed_out);
    assert!(failure.message.contains("rhythm table corrupt"));

    assert!(report.stored > 0);
    assert!(!report.per_engine.contains_key(&EngineKind::Temporal));
    assert!(store
        .all_connections()
        .iter()
        .all(|c| c.engine != EngineKind::Temporal));
}

#[tokio::test]
async fn test_slow_engine_hits_engine_timeout() {
    let store = seeded_store().await;
    let mut registry = EngineRegistry::builtin();
    registry.register(EngineKind::Methodological, slow);
    let synth = synthesizer(store.clone(), registry)
        .with_timeouts(Duration::from_millis(50), Duration::from_secs(5));

    let report = synth
        .detect_all("d1", "v1", &EngineConfig::new("u"))
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].engine, EngineKind::Methodological);
    assert!(report.failures[0].timed_out);
    assert!(report.per_engine.contains_key(&EngineKind::Semantic));
}

/// Delegates to an in-memory store but takes `delay` to load the corpus.
struct SlowCorpusStore {
    inner: Arc<InMemoryStore>,
    delay: Duration,
}

#[async_trait]
impl Store for SlowCorpusStore {
    async fn import_chunks(
        &self,
        document_id: &str,
        version_id: &str,
        chunks: &[ChunkRecord],
    ) -> anyhow::Result<usize> {
        self.inner.import_chunks(document_id, version_id, chunks).await
    }

    async fn load_corpus(&self) -> anyhow::Result<Vec<ChunkRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.load_corpus().await
    }

    async fn document_chunks(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> anyhow::Result<Vec<ChunkRecord>> {
        self.inner.document_chunks(document_id, version_id).await
    }

    async fn persist_run(
        &self,
        run: &DetectionRun,
        candidates: &[CandidateConnection],
    ) -> anyhow::Result<PersistOutcome> {
        self.inner.persist_run(run, candidates).await
    }

    async fn active_connections_for_chunks(
        &self,
        chunk_ids: &[String],
    ) -> anyhow::Result<Vec<Connection>> {
        self.inner.active_connections_for_chunks(chunk_ids).await
    }

    async fn get_connection(&self, id: &str) -> anyhow::Result<Option<Connection>> {
        self.inner.get_connection(id).await
    }

    async fn prune_superseded(&self, before: DateTime<Utc>) -> anyhow::Result<usize> {
        self.inner.prune_superseded(before).await
    }

    async fn append_feedback(&self, feedback: &Feedback) -> anyhow::Result<()> {
        self.inner.append_feedback(feedback).await
    }

    async fn feedback_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<Feedback>> {
        self.inner.feedback_since(since).await
    }

    async fn load_weight_state(&self, user_id: &str) -> anyhow::Result<Option<WeightState>> {
        self.inner.load_weight_state(user_id).await
    }

    async fn save_weight_state(
        &self,
        state: &WeightState,
        adjustments: &[WeightAdjustment],
    ) -> anyhow::Result<()> {
        self.inner.save_weight_state(state, adjustments).await
    }

    async fn adjustment_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<WeightAdjustment>> {
        self.inner.adjustment_history(user_id, limit).await
    }

    async fn add_boost(&self, boost: &Boost) -> anyhow::Result<()> {
        self.inner.add_boost(boost).await
    }

    async fn active_boosts(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Boost>> {
        self.inner.active_boosts(now).await
    }

    async fn prune_expired_boosts(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        self.inner.prune_expired_boosts(now).await
    }
}

#[tokio::test]
async fn test_overall_timeout_covers_corpus_loading() {
    let inner = seeded_store().await;
    let store = Arc::new(SlowCorpusStore {
        inner: inner.clone(),
        delay: Duration::from_millis(400),
    });
    let synth = Synthesizer::new(store, EngineRegistry::builtin(), EngineThresholds::default())
        .with_timeouts(Duration::from_millis(50), Duration::from_millis(150));

    let err = synth
        .detect_all("d1", "v1", &EngineConfig::new("u"))
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SynthesisError>(),
        Some(SynthesisError::DetectionTimedOut { after_ms: 150, .. })
    ));
    assert!(inner.all_connections().is_empty());
}

#[tokio::test]
async fn test_slow_load_within_overall_timeout_still_persists() {
    let inner = seeded_store().await;
    let store = Arc::new(SlowCorpusStore {
        inner: inner.clone(),
        delay: Duration::from_millis(20),
    });
    let synth = Synthesizer::new(store, EngineRegistry::builtin(), EngineThresholds::default())
        .with_timeouts(Duration::from_secs(2), Duration::from_secs(5));

    let report = synth
        .detect_all("d1", "v1", &EngineConfig::new("u"))
        .await
        .unwrap();
    assert!(report.stored > 0);
    assert_eq!(inner.all_connections().len(), report.stored);
}

#[tokio::test]
async fn test_disabled_engine_is_not_run() {
    let store = seeded_store().await;
    let mut registry = EngineRegistry::builtin();
    registry.register(EngineKind::Temporal, panicking);
    let synth = synthesizer(store.clone(), registry);

    let mut config = EngineConfig::new("u");
    config.enabled.insert(EngineKind::Temporal, false);
    let report = synth.detect_all("d1", "v1", &config).await.unwrap();
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_missing_version_is_reported() {
    let store = seeded_store().await;
    let synth = synthesizer(store, EngineRegistry::builtin());

    let err = synth
        .detect_all("d1", "v7", &EngineConfig::new("u"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SynthesisError>(),
        Some(SynthesisError::NoChunks { .. })
    ));
}

#[tokio::test]
async fn test_new_version_supersedes_old_connections() {
    let store = seeded_store().await;
    let synth = synthesizer(store.clone(), EngineRegistry::builtin());
    let config = EngineConfig::new("u");

    let first = synth.detect_all("d1", "v1", &config).await.unwrap();
    assert!(first.stored > 0);

    store
        .import_chunks(
            "d1",
            "v2",
            &[chunk("d1", "v2", "d1-v2-c0", [1.0, 0.0], &["melancholic"])],
        )
        .await
        .unwrap();
    let second = synth.detect_all("d1", "v2", &config).await.unwrap();
    assert_eq!(second.superseded, first.stored);

    let old = store
        .active_connections_for_chunks(&["d1-c0".to_string()])
        .await
        .unwrap();
    assert!(old.is_empty());

    let new = store
        .active_connections_for_chunks(&["d1-v2-c0".to_string()])
        .await
        .unwrap();
    assert!(!new.is_empty());
    assert!(new.iter().all(|c| c.version_id == "v2" && !c.superseded));
}

#[tokio::test]
async fn test_concurrent_runs_on_same_version_leave_one_batch() {
    let store = seeded_store().await;
    let synth = Arc::new(synthesizer(store.clone(), EngineRegistry::builtin()));
    let config = EngineConfig::new("u");

    let (a, b) = tokio::join!(
        synth.detect_all("d1", "v1", &config),
        synth.detect_all("d1", "v1", &config)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.stored, b.stored);

    let active = store
        .all_connections()
        .into_iter()
        .filter(|c| !c.superseded)
        .count();
    assert_eq!(active, a.stored);
}

// ============ HTTP ============

struct TestServer {
    _tmp: TempDir,
    base: String,
    client: reqwest::Client,
}

async fn spawn_server() -> TestServer {
    let tmp = TempDir::new().unwrap();
    let config: Config = toml::from_str(&format!(
        "[db]\npath = \"{}/synth.sqlite\"\n",
        tmp.path().display()
    ))
    .unwrap();

    let pool = db::connect(&config).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
    let seed = seeded_store().await;
    for doc in ["d1", "d2"] {
        let chunks = seed.document_chunks(doc, "v1").await.unwrap();
        store.import_chunks(doc, "v1", &chunks).await.unwrap();
    }

    let synthesizer = Arc::new(Synthesizer::from_config(store, &config));
    let app = router(AppState::new(Arc::new(config), synthesizer));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        _tmp: tmp,
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn patch(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .patch(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn test_http_detect_rank_and_feedback() {
    let server = spawn_server().await;

    let health: Value = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let (status, report) = server
        .post("/detect", json!({ "document_id": "d1", "version_id": "v1" }))
        .await;
    assert_eq!(status, 200, "detect: {}", report);
    assert!(report["stored"].as_u64().unwrap() > 0);

    let (status, body) = server
        .post("/connections", json!({ "chunk_ids": ["d1-c0"] }))
        .await;
    assert_eq!(status, 200);
    let connections = body["connections"].as_array().unwrap();
    assert!(!connections.is_empty());
    let scores: Vec<f64> = connections
        .iter()
        .map(|c| c["weighted_score"].as_f64().unwrap())
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    let id = connections[0]["id"].as_str().unwrap().to_string();

    let (status, feedback) = server
        .post("/feedback", json!({ "connection_id": id, "action": "star" }))
        .await;
    assert_eq!(status, 200, "feedback: {}", feedback);
    assert_eq!(feedback["action"], "star");

    let (status, err) = server
        .post("/feedback", json!({ "connection_id": id, "action": "love" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(err["error"]["code"], "bad_request");

    let (status, err) = server
        .post("/feedback", json!({ "connection_id": "nope", "action": "reject" }))
        .await;
    assert_eq!(status, 404);
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_http_config_edit_and_tune() {
    let server = spawn_server().await;

    let (status, err) = server
        .patch("/config/alice", json!({ "weights": { "semantic": 1.5 } }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(err["error"]["code"], "bad_request");

    let (status, state) = server
        .patch("/config/alice", json!({ "weights": { "semantic": 0.4 } }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(state["config"]["weights"]["semantic"], 0.4);
    assert_eq!(state["config"]["user_id"], "alice");

    let (status, report) = server.post("/tune/alice", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(report["feedback_count"], 0);
    assert!(report["adjustments"].as_array().unwrap().is_empty());

    let (status, err) = server
        .post("/detect", json!({ "document_id": "d9", "version_id": "v1" }))
        .await;
    assert_eq!(status, 404);
    assert_eq!(err["error"]["code"], "not_found");
}
