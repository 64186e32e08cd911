//! # Connection Synthesis
//!
//! Discovers relationships ("connections") between chunks of a personal
//! document library and learns which kinds of connection the reader values.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │  import  │──▶│  7 engines   │──▶│ limits+store │──▶│  SQLite  │
//! │ (JSONL)  │   │ (parallel)   │   │  (versioned) │   │          │
//! └──────────┘   └──────────────┘   └──────────────┘   └────┬─────┘
//!                                                           │
//!                  ┌──────────────┬─────────────────────────┤
//!                  ▼              ▼                         ▼
//!             ┌─────────┐   ┌──────────┐             ┌────────────┐
//!             │ ranking │   │ feedback │────────────▶│   tuner    │
//!             └─────────┘   └──────────┘             └────────────┘
//! ```
//!
//! Pure logic (engines, limits, ranking, tuner math) lives in the
//! `synthesis-core` crate; this crate adds configuration, SQLite storage,
//! the async orchestrator, the CLI, and the HTTP server.
//!
//! ## Quick Start
//!
//! ```bash
//! synth init
//! synth import chunks.jsonl
//! synth detect doc-1 v1
//! synth connections doc-1-c0 doc-1-c1
//! synth feedback <connection-id> star
//! synth tune
//! synth serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`import`] | Chunk hand-off import |
//! | [`synthesis`] | Detection orchestrator |
//! | [`query`] | Ranked read path and config edits |
//! | [`feedback`] | Feedback recording and starred boosts |
//! | [`tune`] | Weight tuning job |
//! | [`stats`] | Database statistics |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod feedback;
pub mod import;
pub mod logging;
pub mod migrate;
pub mod query;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod synthesis;
pub mod tune;
