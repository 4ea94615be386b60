//! polimatch-core: Core library for polimatch
//!
//! Estimates a respondent's position in one or more latent political spaces
//! from a handful of adaptively chosen bill questions, then ranks legislators
//! by similarity to that position.
//!
//! # Architecture
//!
//! ```text
//! LatentSpaceProvider ─▶ Session ─┬─▶ Selector  (next bill)
//!                                 ├─▶ Estimator (position, uncertainty)
//!                                 └─▶ Ranker    (member matches)
//!                          │
//!                     Orchestrator ─▶ ClusterResult per space ─▶ aggregate ─▶ global ranking
//!                                                       │
//!                                                  ResultStore (SQLite)
//! ```
//!
//! # Modules
//!
//! - `latent_space`: Immutable spaces, artifact ingestion, providers
//! - `answers`: Scores and per-session answer sets
//! - `estimator`: Ridge solve of the normal equations plus uncertainty
//! - `selector`: Greedy alignment × controversy question selection
//! - `ranker`: Cosine similarity ranking
//! - `session`: Per-space state machine
//! - `service`: Sessions addressed by opaque id
//! - `orchestrator`: Multi-space runs with progress tokens
//! - `aggregation`: Importance-weighted global scores
//! - `storage`: SQLite persistence of completed runs
//! - `config`: Configuration management
//! - `logging`: Structured logging
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod aggregation;
pub mod answers;
pub mod config;
pub mod error;
pub mod estimator;
pub mod latent_space;
pub mod logging;
pub mod orchestrator;
pub mod ranker;
pub mod selector;
pub mod service;
pub mod session;
pub mod storage;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
