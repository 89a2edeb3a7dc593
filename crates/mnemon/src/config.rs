//! Runtime configuration: TOML-backed, with validated defaults.
//!
//! Every tunable in the retrieval and composition path lives here. The
//! numeric defaults are empirical tuning, not contracts. In particular
//! `long_query_factor` (the coarsening applied to the similarity
//! threshold for multi-sentence queries) carries no semantic meaning
//! beyond "longer queries produce noisier embeddings".

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use mnemon_core::fusion::FusionStrategy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Fusion strategy for merging vector and lexical results.
    #[serde(default)]
    pub fusion: FusionStrategy,
    /// Post-fusion relevance threshold. Queries with nothing above it
    /// yield an empty result set ("no relevant context"), not an error.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Minimum cosine similarity for vector candidates.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Threshold multiplier for multi-sentence queries. Heuristic,
    /// tunable.
    #[serde(default = "default_long_query_factor")]
    pub long_query_factor: f32,
    /// Number of vector candidates to fetch.
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    /// Number of lexical candidates to fetch.
    #[serde(default = "default_candidate_k")]
    pub candidate_k_lexical: usize,
    /// Maximum fused results handed to the provider output.
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fusion: FusionStrategy::default(),
            min_score: default_min_score(),
            min_similarity: default_min_similarity(),
            long_query_factor: default_long_query_factor(),
            candidate_k_vector: default_candidate_k(),
            candidate_k_lexical: default_candidate_k(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_min_score() -> f64 {
    0.0
}
fn default_min_similarity() -> f32 {
    0.2
}
fn default_long_query_factor() -> f32 {
    0.5
}
fn default_candidate_k() -> usize {
    32
}
fn default_final_limit() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComposerConfig {
    /// Per-provider timeout in milliseconds.
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    /// Soft budget for one whole composition pass, in milliseconds.
    #[serde(default = "default_total_budget_ms")]
    pub total_budget_ms: u64,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: default_provider_timeout_ms(),
            total_budget_ms: default_total_budget_ms(),
        }
    }
}

fn default_provider_timeout_ms() -> u64 {
    1500
}
fn default_total_budget_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Maximum cached query embeddings per agent.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Embedding-cache time-to-live in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_capacity() -> usize {
    128
}
fn default_cache_ttl_secs() -> u64 {
    300
}

/// Load and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: RuntimeConfig =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Validate a config, whether loaded or built in code.
pub fn validate(config: &RuntimeConfig) -> Result<()> {
    if let FusionStrategy::Weighted { alpha } = config.retrieval.fusion {
        if !(0.0..=1.0).contains(&alpha) {
            anyhow::bail!("retrieval.fusion alpha must be in [0.0, 1.0]");
        }
    }
    if !(0.0..=1.0).contains(&config.retrieval.long_query_factor) {
        anyhow::bail!("retrieval.long_query_factor must be in [0.0, 1.0]");
    }
    if config.retrieval.final_limit == 0 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if config.composer.provider_timeout_ms == 0 || config.composer.total_budget_ms == 0 {
        anyhow::bail!("composer timeouts must be > 0");
    }
    if config.cache.capacity == 0 {
        anyhow::bail!("cache.capacity must be >= 1");
    }
    Ok(())
}
