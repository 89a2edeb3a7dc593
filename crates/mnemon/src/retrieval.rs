//! Hybrid retrieval: the engine owning the per-agent indices, and the
//! context provider exposing it to the composer.
//!
//! The engine exclusively owns its in-memory indices. Documents come
//! from an external durable [`DocumentSource`]; the engine never writes
//! back. The indices are ephemeral and rebuilt from the source on demand
//! (first query after construction, or after [`RetrievalEngine::clear`]).
//!
//! Query pipeline: embed (memoized) → vector candidates + lexical
//! candidates → fuse → threshold → truncate. The vector similarity
//! threshold is coarsened for multi-sentence queries, since longer
//! queries produce noisier embeddings; the factor is configuration, not
//! contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use mnemon_core::cache::BoundedCache;
use mnemon_core::error::IndexError;
use mnemon_core::fusion::{apply_threshold, fuse, FusionStrategy};
use mnemon_core::lexical::{Bm25Index, Bm25Params};
use mnemon_core::models::{Document, RetrievalResult, SourceTag};
use mnemon_core::vector::VectorIndex;

use crate::config::{CacheConfig, RetrievalConfig};
use crate::provider::ContextProvider;
use crate::state::{ComposedState, Message, ProviderOutput};

/// External embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding dimensionality. Must match the index configuration.
    fn dims(&self) -> usize;
    /// Embed one text into a dense vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// External durable document store. Read-only from the core's side.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn list_documents(&self, agent_id: &str) -> Result<Vec<Document>>;
    async fn document_count(&self, agent_id: &str) -> Result<usize>;
}

/// Per-source breakdown attached to results when explain is requested.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievalExplain {
    pub vector: Vec<RetrievalResult>,
    pub lexical: Vec<RetrievalResult>,
    /// The similarity threshold actually applied, after any
    /// multi-sentence coarsening.
    pub effective_min_similarity: f32,
}

/// Result of one retrieval query.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub results: Vec<RetrievalResult>,
    pub explain: Option<RetrievalExplain>,
}

/// Owns the vector and lexical indices for one agent.
///
/// Single-writer: the owning runtime serializes mutation; concurrent
/// composition passes go through a mutex in [`RetrievalProvider`]. Each
/// mutation is individually atomic, so cancelling a caller between
/// mutations never leaves a partially mutated index.
pub struct RetrievalEngine {
    agent_id: String,
    config: RetrievalConfig,
    vector: VectorIndex,
    lexical: Bm25Index,
    documents: HashMap<String, Document>,
    /// Query embeddings memoized by content hash.
    embedding_cache: BoundedCache<String, Vec<f32>>,
}

impl RetrievalEngine {
    pub fn new(
        agent_id: impl Into<String>,
        dims: usize,
        config: RetrievalConfig,
        cache: &CacheConfig,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            config,
            vector: VectorIndex::new(dims),
            lexical: Bm25Index::new(Bm25Params::default()),
            documents: HashMap::new(),
            embedding_cache: BoundedCache::new(cache.capacity, Duration::from_secs(cache.ttl_secs)),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Live document count (every document is lexically indexed; only
    /// embedded ones are in the vector index).
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn vector_count(&self) -> usize {
        self.vector.len()
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn cache_hits(&self) -> u64 {
        self.embedding_cache.hits()
    }

    pub fn cache_misses(&self) -> u64 {
        self.embedding_cache.misses()
    }

    /// Index one document. Fails fast on embedding dimensionality
    /// mismatch without touching either index.
    pub fn add(&mut self, doc: Document) -> Result<(), IndexError> {
        if let Some(embedding) = &doc.embedding {
            if embedding.len() != self.vector.dims() {
                return Err(IndexError::DimensionMismatch {
                    expected: self.vector.dims(),
                    actual: embedding.len(),
                });
            }
        }

        self.lexical.insert(&doc.id, &[("content", &doc.content)]);
        if let Some(embedding) = &doc.embedding {
            self.vector.add(doc.id.clone(), embedding.clone())?;
        }
        self.documents.insert(doc.id.clone(), doc);
        Ok(())
    }

    /// Soft-delete a document from both indices.
    pub fn remove(&mut self, id: &str) -> bool {
        let present = self.documents.remove(id).is_some();
        self.lexical.remove(id);
        self.vector.remove(id);
        present
    }

    /// Drop all indexed documents. The next query triggers a rebuild
    /// from the durable source.
    pub fn clear(&mut self) {
        self.documents.clear();
        self.lexical.clear();
        self.vector.clear();
        self.embedding_cache.clear();
    }

    /// Rebuild the indices from a full document listing.
    pub fn rebuild(&mut self, docs: Vec<Document>) -> Result<(), IndexError> {
        self.clear();
        for doc in docs {
            self.add(doc)?;
        }
        Ok(())
    }

    /// Run one hybrid query.
    ///
    /// Returns an empty outcome (never an error) when the corpus is
    /// empty or nothing clears the post-fusion threshold.
    pub async fn query(
        &mut self,
        embedder: &dyn Embedder,
        text: &str,
        explain: bool,
    ) -> Result<RetrievalOutcome> {
        if self.documents.is_empty() {
            return Ok(RetrievalOutcome {
                results: Vec::new(),
                explain: None,
            });
        }

        let effective_min_similarity = self.effective_min_similarity(text);

        let vector_results = if !matches!(self.config.fusion, FusionStrategy::LexicalOnly)
            && !self.vector.is_empty()
        {
            let query_vec = self.query_embedding(embedder, text).await?;
            self.vector
                .search(
                    &query_vec,
                    self.config.candidate_k_vector,
                    effective_min_similarity,
                )?
                .into_iter()
                .enumerate()
                .map(|(i, n)| RetrievalResult::new(n.id, n.score as f64, i + 1, SourceTag::Vector))
                .collect()
        } else {
            Vec::new()
        };

        let lexical_results: Vec<RetrievalResult> =
            if !matches!(self.config.fusion, FusionStrategy::VectorOnly) {
                self.lexical
                    .search(text, Some(self.config.candidate_k_lexical))
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| RetrievalResult::new(s.id, s.score, i + 1, SourceTag::Lexical))
                    .collect()
            } else {
                Vec::new()
            };

        let fused = fuse(&vector_results, &lexical_results, self.config.fusion);
        let mut results = apply_threshold(fused, self.config.min_score);
        results.truncate(self.config.final_limit);

        debug!(
            agent = %self.agent_id,
            vector = vector_results.len(),
            lexical = lexical_results.len(),
            fused = results.len(),
            "retrieval query"
        );

        let explain = explain.then(|| RetrievalExplain {
            vector: vector_results,
            lexical: lexical_results,
            effective_min_similarity,
        });

        Ok(RetrievalOutcome { results, explain })
    }

    /// Embed a query, memoized by content hash.
    async fn query_embedding(&mut self, embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
        let key = content_hash(text);
        if let Some(cached) = self.embedding_cache.get(&key) {
            return Ok(cached.clone());
        }

        let vec = embedder.embed(text).await?;
        if vec.len() != self.vector.dims() {
            return Err(IndexError::DimensionMismatch {
                expected: self.vector.dims(),
                actual: vec.len(),
            }
            .into());
        }
        self.embedding_cache.insert(key, vec.clone());
        Ok(vec)
    }

    /// Coarsen the similarity threshold for multi-sentence queries.
    fn effective_min_similarity(&self, text: &str) -> f32 {
        if sentence_count(text) > 1 {
            self.config.min_similarity * self.config.long_query_factor
        } else {
            self.config.min_similarity
        }
    }
}

/// Count sentence-like segments in a query.
fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1)
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Registry name of the retrieval provider.
pub const RETRIEVAL_PROVIDER: &str = "memories";

/// The composer-facing retrieval provider.
///
/// Flagged dynamic: a composition pass must request it by name, bounding
/// cost for passes that do not need long-term memory. Skips all index
/// and embedding work when the durable store reports zero documents.
pub struct RetrievalProvider {
    engine: Arc<Mutex<RetrievalEngine>>,
    source: Arc<dyn DocumentSource>,
    embedder: Arc<dyn Embedder>,
    explain: bool,
}

impl RetrievalProvider {
    pub fn new(
        engine: Arc<Mutex<RetrievalEngine>>,
        source: Arc<dyn DocumentSource>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            engine,
            source,
            embedder,
            explain: false,
        }
    }

    /// Attach per-source score breakdowns to the provider output.
    pub fn with_explain(mut self) -> Self {
        self.explain = true;
        self
    }
}

#[async_trait]
impl ContextProvider for RetrievalProvider {
    fn name(&self) -> &str {
        RETRIEVAL_PROVIDER
    }

    fn priority(&self) -> i32 {
        10
    }

    fn dynamic(&self) -> bool {
        true
    }

    async fn get(&self, message: &Message, _state: &ComposedState) -> Result<ProviderOutput> {
        // Memories belong to the agent the engine serves, not to the
        // message's sender.
        let mut engine = self.engine.lock().await;
        let agent_id = engine.agent_id().to_string();

        // Cheap short-circuit: no documents means no vector/BM25 work and
        // no embedding call at all.
        let count = self.source.document_count(&agent_id).await?;
        if count == 0 {
            return Ok(ProviderOutput::empty());
        }

        if engine.document_count() == 0 {
            let docs = self.source.list_documents(&agent_id).await?;
            engine.rebuild(docs)?;
        }

        let outcome = engine
            .query(self.embedder.as_ref(), &message.content, self.explain)
            .await?;
        if outcome.results.is_empty() {
            return Ok(ProviderOutput::empty());
        }

        let mut text = String::from("# Relevant memories");
        for r in &outcome.results {
            if let Some(doc) = engine.document(&r.id) {
                text.push_str("\n- ");
                text.push_str(doc.content.trim());
            }
        }

        let mut output = ProviderOutput::with_text(text);
        output
            .values
            .insert("memory_count".to_string(), outcome.results.len().to_string());
        let mut data = serde_json::json!({ "results": outcome.results });
        if let Some(explain) = &outcome.explain {
            data["explain"] = serde_json::to_value(explain)?;
        }
        output.data = data;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic toy embedder: buckets a few known words onto axes.
    pub(crate) struct ToyEmbedder {
        pub calls: AtomicUsize,
    }

    impl ToyEmbedder {
        pub(crate) fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for ToyEmbedder {
        fn dims(&self) -> usize {
            4
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let lower = text.to_lowercase();
            let mut v = [0.05f32; 4];
            if lower.contains("ship") {
                v[0] += 1.0;
            }
            if lower.contains("ocean") {
                v[1] += 1.0;
            }
            if lower.contains("engine") {
                v[2] += 1.0;
            }
            if lower.contains("cargo") {
                v[3] += 1.0;
            }
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            Ok(v.iter().map(|x| x / norm).collect())
        }
    }

    fn engine() -> RetrievalEngine {
        RetrievalEngine::new(
            "agent-1",
            4,
            RetrievalConfig::default(),
            &CacheConfig::default(),
        )
    }

    async fn embed_doc(embedder: &ToyEmbedder, agent: &str, content: &str) -> Document {
        let v = embedder.embed(content).await.unwrap();
        Document::new(agent, content).with_embedding(v)
    }

    #[tokio::test]
    async fn test_hybrid_query_ranks_relevant_first() {
        let embedder = ToyEmbedder::new();
        let mut engine = engine();
        engine
            .add(embed_doc(&embedder, "agent-1", "the ship sails the ocean").await)
            .unwrap();
        engine
            .add(embed_doc(&embedder, "agent-1", "engine maintenance schedule").await)
            .unwrap();
        engine
            .add(embed_doc(&embedder, "agent-1", "cargo manifest for tuesday").await)
            .unwrap();

        let outcome = engine
            .query(&embedder, "how is the ship doing on the ocean", false)
            .await
            .unwrap();
        assert!(!outcome.results.is_empty());
        let top = engine.document(&outcome.results[0].id).unwrap();
        assert!(top.content.contains("ship"));
    }

    #[tokio::test]
    async fn test_empty_engine_skips_embedding() {
        let embedder = ToyEmbedder::new();
        let mut engine = engine();
        let outcome = engine.query(&embedder, "anything", false).await.unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_query_embedding_memoized() {
        let embedder = ToyEmbedder::new();
        let mut engine = engine();
        engine
            .add(embed_doc(&embedder, "agent-1", "ship log entry").await)
            .unwrap();
        let baseline = embedder.calls.load(Ordering::SeqCst);

        engine.query(&embedder, "ship", false).await.unwrap();
        engine.query(&embedder, "ship", false).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), baseline + 1);
        assert_eq!(engine.cache_hits(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_fast() {
        let mut engine = engine();
        let doc = Document::new("agent-1", "bad vector").with_embedding(vec![1.0, 0.0]);
        let err = engine.add(doc).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        // Neither index was touched.
        assert_eq!(engine.document_count(), 0);
        assert_eq!(engine.vector_count(), 0);
    }

    #[tokio::test]
    async fn test_explain_payload() {
        let embedder = ToyEmbedder::new();
        let mut engine = engine();
        engine
            .add(embed_doc(&embedder, "agent-1", "ocean currents report").await)
            .unwrap();

        let outcome = engine.query(&embedder, "ocean", true).await.unwrap();
        let explain = outcome.explain.expect("explain requested");
        assert!(!explain.vector.is_empty() || !explain.lexical.is_empty());
        assert!((explain.effective_min_similarity - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_sentence_count() {
        assert_eq!(sentence_count("just one clause"), 1);
        assert_eq!(sentence_count("First. Second!"), 2);
        assert_eq!(sentence_count("Trailing dot."), 1);
        assert_eq!(sentence_count(""), 1);
    }

    #[test]
    fn test_multi_sentence_coarsens_threshold() {
        let engine = engine();
        let single = engine.effective_min_similarity("what is our heading");
        let multi = engine.effective_min_similarity("what is our heading? any storms ahead?");
        assert!((single - 0.2).abs() < 1e-6);
        assert!((multi - 0.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_remove_then_query_excludes_document() {
        let embedder = ToyEmbedder::new();
        let mut engine = engine();
        let doc = embed_doc(&embedder, "agent-1", "cargo inventory").await;
        let id = doc.id.clone();
        engine.add(doc).unwrap();
        engine
            .add(embed_doc(&embedder, "agent-1", "cargo loading plan").await)
            .unwrap();

        assert!(engine.remove(&id));
        let outcome = engine.query(&embedder, "cargo", false).await.unwrap();
        assert!(outcome.results.iter().all(|r| r.id != id));
    }
}
