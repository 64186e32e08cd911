//! # Synthesis Core
//!
//! Pure logic for connection synthesis: the chunk and connection data
//! model, the seven detection engines and their registry, the storage-limit
//! pass, read-time ranking, feedback aggregation, weight tuning, and the
//! [`store::Store`] abstraction.
//!
//! This crate does no I/O of its own. It has no tokio, sqlx, or filesystem
//! dependency; the application crate supplies the runtime, the SQLite store,
//! and the orchestration around these pieces.

pub mod corpus;
pub mod engines;
pub mod error;
pub mod feedback;
pub mod limits;
pub mod models;
pub mod ranking;
pub mod similarity;
pub mod store;
pub mod tuner;
pub mod weights;
