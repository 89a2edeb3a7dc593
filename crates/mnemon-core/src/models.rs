//! Core data types shared across the retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable knowledge record owned by a single agent.
///
/// Documents are supplied by an external durable store; the retrieval
/// core indexes them but never writes back. The embedding is computed
/// once at capture time and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable document UUID.
    pub id: String,
    /// Owning agent identifier (per-agent namespacing).
    pub agent_id: String,
    /// Free-text content.
    pub content: String,
    /// Dense embedding vector, if one has been computed.
    pub embedding: Option<Vec<f32>>,
    /// Free-form key/value metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Capture timestamp.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a document with a fresh UUID and the current timestamp.
    pub fn new(agent_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            content: content.into(),
            embedding: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    /// Attach an embedding vector.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Which retrieval path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Vector,
    Lexical,
    Fused,
}

/// A single ranked retrieval hit. Ephemeral: produced per query, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Document UUID.
    pub id: String,
    /// Relevance score. Scale depends on [`SourceTag`]: cosine similarity
    /// for vector hits, BM25 for lexical hits, strategy-defined for fused.
    pub score: f64,
    /// 1-based rank within its result list.
    pub rank: usize,
    /// Which retrieval path produced this hit.
    pub source: SourceTag,
}

impl RetrievalResult {
    pub fn new(id: impl Into<String>, score: f64, rank: usize, source: SourceTag) -> Self {
        Self {
            id: id.into(),
            score,
            rank,
            source,
        }
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
