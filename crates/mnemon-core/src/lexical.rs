//! Lexical index with BM25 (Okapi) probabilistic ranking.
//!
//! Scoring combines term-frequency saturation (`k1`) with document-length
//! normalization against the corpus average length (`b`). Per-field
//! boosting is supported: a query is scored against each named field with
//! an independent weight and the field scores sum.
//!
//! Average field length and per-term document frequency are maintained
//! incrementally on insert/remove so they always reflect the live
//! document set. Candidate collection is a linear scan over the stored
//! term-frequency tables; the corpus is an in-process, per-agent slice,
//! not a search cluster.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::Document;

/// BM25 tuning constants.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Document-length normalization strength.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Optional token statistics, populated only when requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStats {
    /// Occurrences per distinct token.
    pub token_counts: HashMap<String, usize>,
    /// Total token count.
    pub total_tokens: usize,
}

/// Output of [`Tokenizer::tokenize`].
#[derive(Debug, Clone)]
pub struct Tokenized {
    pub tokens: Vec<String>,
    /// Present only when `include_stats` was requested; skipping it
    /// avoids the counting allocation on the hot path.
    pub stats: Option<TokenStats>,
}

/// Lowercasing word tokenizer splitting on non-alphanumeric boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tokenizer;

impl Tokenizer {
    pub fn tokenize(&self, text: &str, include_stats: bool) -> Tokenized {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        let stats = include_stats.then(|| {
            let mut token_counts: HashMap<String, usize> = HashMap::new();
            for t in &tokens {
                *token_counts.entry(t.clone()).or_default() += 1;
            }
            TokenStats {
                token_counts,
                total_tokens: tokens.len(),
            }
        });

        Tokenized { tokens, stats }
    }
}

/// A scored lexical hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub id: String,
    pub score: f64,
}

#[derive(Debug, Default)]
struct FieldStats {
    /// Number of live documents containing each term.
    doc_freq: HashMap<String, usize>,
    /// Sum of field lengths over live documents carrying the field.
    total_len: usize,
    /// Number of live documents carrying the field.
    doc_count: usize,
}

impl FieldStats {
    fn avg_len(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.total_len as f64 / self.doc_count as f64
        }
    }
}

#[derive(Debug)]
struct FieldData {
    tf: HashMap<String, usize>,
    len: usize,
}

/// Incremental BM25 index over named document fields.
#[derive(Debug, Default)]
pub struct Bm25Index {
    params: Bm25Params,
    tokenizer: Tokenizer,
    field_weights: HashMap<String, f64>,
    docs: HashMap<String, HashMap<String, FieldData>>,
    fields: HashMap<String, FieldStats>,
}

/// Field name used by the [`Bm25Index::index`] convenience path.
pub const CONTENT_FIELD: &str = "content";

impl Bm25Index {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// Set the boost weight for a field. Unset fields weigh 1.0.
    pub fn with_field_weight(mut self, field: impl Into<String>, weight: f64) -> Self {
        self.field_weights.insert(field.into(), weight);
        self
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Index a batch of documents under the default content field.
    pub fn index(&mut self, documents: &[Document]) {
        for doc in documents {
            self.insert(&doc.id, &[(CONTENT_FIELD, &doc.content)]);
        }
    }

    /// Insert one document with named fields. Re-inserting an id replaces
    /// the prior entry.
    pub fn insert(&mut self, id: &str, fields: &[(&str, &str)]) {
        if self.docs.contains_key(id) {
            self.remove(id);
        }

        let mut entry: HashMap<String, FieldData> = HashMap::new();
        for (field, text) in fields {
            let tokenized = self.tokenizer.tokenize(text, true);
            let stats = tokenized.stats.unwrap_or_default();

            let field_stats = self.fields.entry((*field).to_string()).or_default();
            field_stats.doc_count += 1;
            field_stats.total_len += stats.total_tokens;
            for term in stats.token_counts.keys() {
                *field_stats.doc_freq.entry(term.clone()).or_default() += 1;
            }

            entry.insert(
                (*field).to_string(),
                FieldData {
                    tf: stats.token_counts,
                    len: stats.total_tokens,
                },
            );
        }
        self.docs.insert(id.to_string(), entry);
    }

    /// Remove a document, keeping df and average-length statistics
    /// consistent with the surviving set. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(entry) = self.docs.remove(id) else {
            return false;
        };

        for (field, data) in entry {
            if let Some(stats) = self.fields.get_mut(&field) {
                stats.doc_count -= 1;
                stats.total_len -= data.len;
                for term in data.tf.keys() {
                    if let Some(df) = stats.doc_freq.get_mut(term) {
                        *df -= 1;
                        if *df == 0 {
                            stats.doc_freq.remove(term);
                        }
                    }
                }
            }
        }
        true
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.docs.clear();
        self.fields.clear();
    }

    /// Score all documents against the query.
    ///
    /// With `k = None` every matching document is returned in descending
    /// score order. With `Some(k)` only the top-k are returned; selection
    /// uses a partial sort so the full candidate list is never ordered.
    /// Ties break by ascending document id for determinism.
    pub fn search(&self, query: &str, k: Option<usize>) -> Vec<ScoredDoc> {
        let terms = self.tokenizer.tokenize(query, false).tokens;
        if terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<ScoredDoc> = self
            .docs
            .iter()
            .filter_map(|(id, fields)| {
                let score = self.score_doc(fields, &terms);
                (score > 0.0).then(|| ScoredDoc {
                    id: id.clone(),
                    score,
                })
            })
            .collect();

        let cmp = |a: &ScoredDoc, b: &ScoredDoc| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        };

        match k {
            Some(k) if k < scored.len() => {
                scored.select_nth_unstable_by(k, cmp);
                scored.truncate(k);
                scored.sort_by(cmp);
            }
            _ => scored.sort_by(cmp),
        }
        scored
    }

    fn score_doc(&self, fields: &HashMap<String, FieldData>, terms: &[String]) -> f64 {
        let Bm25Params { k1, b } = self.params;
        let mut score = 0.0;

        for (field, data) in fields {
            let Some(stats) = self.fields.get(field) else {
                continue;
            };
            let weight = self.field_weights.get(field).copied().unwrap_or(1.0);
            let avg_len = stats.avg_len();
            let norm = if avg_len > 0.0 {
                1.0 - b + b * data.len as f64 / avg_len
            } else {
                1.0
            };

            let n = stats.doc_count as f64;
            let mut field_score = 0.0;
            for term in terms {
                let tf = data.tf.get(term).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let df = stats.doc_freq.get(term).copied().unwrap_or(0) as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                field_score += idf * tf / (tf + k1 * norm);
            }
            score += weight * field_score;
        }
        score
    }
}
