use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

use devdocs_common::config::RerankConfig;
use devdocs_common::types::DocumentationResult;

/// Errors from cross-encoder re-ranking.
#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cross-encoder error: {0}")]
    Model(String),
}

/// Object-safe seam over batched (query, passage) scoring (dyn dispatch).
/// Returns one raw score per document, aligned with input order.
pub trait CrossEncoder: Send + Sync {
    fn score_pairs<'a>(
        &'a self,
        query: &'a str,
        documents: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, RerankError>> + Send + 'a>>;
}

/// In-process cross-encoder via fastembed (ONNX Runtime). Serialized behind
/// a mutex and run on the blocking pool, like the local embedding model.
pub struct FastembedCrossEncoder {
    model: Arc<Mutex<TextRerank>>,
    batch_size: usize,
}

impl FastembedCrossEncoder {
    pub fn load(config: &RerankConfig) -> Result<Self, RerankError> {
        let kind = match config.model.as_str() {
            "jina-reranker-v1-turbo-en" => RerankerModel::JINARerankerV1TurboEn,
            "bge-reranker-base" => RerankerModel::BGERerankerBase,
            other => {
                return Err(RerankError::Model(format!(
                    "Unknown reranker model: {}",
                    other
                )))
            }
        };

        tracing::info!(model = config.model.as_str(), "Loading cross-encoder model");

        let model = TextRerank::try_new(RerankInitOptions::new(kind))
            .map_err(|e| RerankError::Model(format!("Failed to load cross-encoder: {}", e)))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            batch_size: config.batch_size,
        })
    }
}

impl CrossEncoder for FastembedCrossEncoder {
    fn score_pairs<'a>(
        &'a self,
        query: &'a str,
        documents: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, RerankError>> + Send + 'a>> {
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let query = query.to_string();
        let documents = documents.to_vec();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| RerankError::Model("Cross-encoder lock poisoned".into()))?;

                let ranked = model
                    .rerank(&query, documents.iter().collect(), false, Some(batch_size))
                    .map_err(|e| RerankError::Model(format!("Rerank inference failed: {}", e)))?;

                // fastembed returns results sorted by score; realign with
                // the input order via the carried index.
                let mut scores = vec![0.0f32; documents.len()];
                for item in ranked {
                    if let Some(slot) = scores.get_mut(item.index) {
                        *slot = item.score;
                    }
                }
                Ok(scores)
            })
            .await
            .map_err(|e| RerankError::Model(format!("Rerank task panicked: {}", e)))?
        })
    }
}

/// Cross-encoder re-ranking over documentation results.
///
/// Replaces each result's retrieval score with the cross-encoder's, pushed
/// through a sigmoid so scores stay in [0, 1]. Downstream thresholds (e.g.
/// the 0.7 self-correction cutoff) were tuned against cosine similarity and
/// are compared against these sigmoid scores unchanged.
pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>) -> Self {
        Self { encoder }
    }

    /// Re-score `results` against `query`, sort descending, truncate to
    /// `top_k` when given. The set of result contents is preserved; only
    /// scores and order change. Empty query or results is a caller error.
    pub async fn rerank(
        &self,
        query: &str,
        results: &[DocumentationResult],
        top_k: Option<usize>,
    ) -> Result<Vec<DocumentationResult>, RerankError> {
        if query.trim().is_empty() {
            return Err(RerankError::InvalidInput("Query cannot be empty".into()));
        }
        if results.is_empty() {
            return Err(RerankError::InvalidInput(
                "Results list cannot be empty".into(),
            ));
        }

        let start = std::time::Instant::now();
        let documents: Vec<String> = results.iter().map(|r| r.content.clone()).collect();
        let raw_scores = self.encoder.score_pairs(query, &documents).await?;

        if raw_scores.len() != results.len() {
            return Err(RerankError::Model(format!(
                "Cross-encoder returned {} scores for {} documents",
                raw_scores.len(),
                results.len()
            )));
        }

        let mut reranked: Vec<DocumentationResult> = results
            .iter()
            .zip(raw_scores)
            .map(|(result, raw)| DocumentationResult {
                score: sigmoid(raw as f64),
                ..result.clone()
            })
            .collect();

        reranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        if let Some(top_k) = top_k {
            if top_k > 0 {
                reranked.truncate(top_k);
            }
        }

        metrics::histogram!("rerank.latency").record(start.elapsed().as_secs_f64());
        metrics::counter!("rerank.documents").increment(documents.len() as u64);

        Ok(reranked)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
