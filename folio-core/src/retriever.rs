//! Hybrid retrieval: dense recall re-ranked by lexical term counts.
//!
//! The index is over-fetched by `candidate_multiplier` so the lexical
//! signal has room to promote exact-keyword chunks that dense similarity
//! alone would rank lower. The blended score is
//! `similarity_weight * sim + lexical_weight * term_count`; the lexical
//! term is an unbounded raw count, so repeated keyword hits can dominate
//! the bounded similarity term.

use std::sync::Arc;
use tracing::debug;

use crate::chunk::ChunkRecord;
use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::ollama::ModelService;
use crate::store::{CorpusStore, l2_normalize};

/// One ranked retrieval hit.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    /// Row in the store's log/index.
    pub row: usize,
    /// Blended similarity + lexical score.
    pub score: f32,
    pub record: ChunkRecord,
}

/// Embeds questions and ranks store rows by the blended score.
pub struct HybridRetriever {
    service: Arc<dyn ModelService>,
    config: RetrievalConfig,
    embedding_model: String,
}

impl HybridRetriever {
    pub fn new(
        service: Arc<dyn ModelService>,
        config: RetrievalConfig,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            service,
            config,
            embedding_model: embedding_model.into(),
        }
    }

    /// Return up to `k` chunks for the question, best first. An empty
    /// store yields an empty list without calling the model service.
    pub async fn retrieve(
        &self,
        store: &CorpusStore,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if store.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = l2_normalize(
            self.service
                .embed(question, &self.embedding_model)
                .await?,
        );
        let candidates = store.search(&query, k * self.config.candidate_multiplier)?;
        let tokens = tokenize(question);

        let mut ranked: Vec<RetrievedChunk> = candidates
            .into_iter()
            .filter_map(|(row, similarity)| {
                store.record(row).map(|record| RetrievedChunk {
                    row,
                    score: self.config.similarity_weight * similarity
                        + self.config.lexical_weight * lexical_score(&record.text, &tokens),
                    record: record.clone(),
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);

        debug!(
            candidates = ranked.len(),
            top_score = ranked.first().map(|r| r.score),
            "Retrieved context"
        );
        Ok(ranked)
    }
}

/// Word tokens of the question, lower-cased.
fn tokenize(question: &str) -> Vec<String> {
    question
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Summed non-overlapping occurrence counts of the question's tokens
/// (longer than 2 characters) in the lower-cased chunk text.
fn lexical_score(text: &str, tokens: &[String]) -> f32 {
    let lowered = text.to_lowercase();
    tokens
        .iter()
        .filter(|t| t.chars().count() > 2)
        .map(|t| lowered.matches(t.as_str()).count())
        .sum::<usize>() as f32
}
