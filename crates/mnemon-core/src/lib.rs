//! # Mnemon Core
//!
//! Pure retrieval algorithms for the mnemon agent runtime: data models,
//! an ephemeral approximate-nearest-neighbor vector index, a BM25 lexical
//! index, rank fusion, and a bounded LRU/TTL cache.
//!
//! This crate contains no tokio, no I/O, and no other native-only
//! dependencies. All orchestration (providers, actions, plugins, the
//! event bus) lives in the `mnemon` app crate.

pub mod cache;
pub mod error;
pub mod fusion;
pub mod lexical;
pub mod models;
pub mod vector;
