use std::sync::Arc;

use serde_json::json;

use devdocs_common::types::DocumentationResult;

use crate::embeddings::{Embedder, EmbeddingError};
use crate::rerank::Reranker;
use crate::store::{DocumentationIndex, StoreError};
use crate::tool_cache::ToolCache;

const TOOL_NAME: &str = "search_framework_docs";
const RESULT_CACHE_TTL: u64 = 300;

/// Errors from documentation search. Cache and re-rank problems never
/// appear here — those degrade in place.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SearchError> for devdocs_common::DevDocsError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::InvalidInput(msg) => devdocs_common::DevDocsError::InvalidInput(msg),
            SearchError::Embedding(inner) => inner.into(),
            SearchError::Store(inner) => inner.into(),
        }
    }
}

/// Semantic documentation retrieval: vector search with cross-encoder
/// re-ranking, a one-shot query reformulation when confidence is low, and
/// tool-level caching around the whole thing.
pub struct DocumentationSearchAgent {
    index: Arc<dyn DocumentationIndex>,
    reranker: Arc<Reranker>,
    embedder: Arc<dyn Embedder>,
    tool_cache: Arc<ToolCache>,
    self_correction_threshold: f64,
}

impl DocumentationSearchAgent {
    pub fn new(
        index: Arc<dyn DocumentationIndex>,
        reranker: Arc<Reranker>,
        embedder: Arc<dyn Embedder>,
        tool_cache: Arc<ToolCache>,
        self_correction_threshold: f64,
    ) -> Self {
        Self {
            index,
            reranker,
            embedder,
            tool_cache,
            self_correction_threshold,
        }
    }

    /// Search framework documentation. Returns up to `top_k` results with
    /// scores in [0, 1], best first.
    pub async fn search(
        &self,
        query: &str,
        frameworks: Option<&[String]>,
        top_k: usize,
        min_score: f64,
    ) -> Result<Vec<DocumentationResult>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidInput("Query cannot be empty".into()));
        }

        let cache_params = json!({
            "query": query,
            "frameworks": frameworks,
            "top_k": top_k,
            "min_score": min_score,
        });
        let cache_key = ToolCache::generate_cache_key(TOOL_NAME, &cache_params);

        if let Some(cached) = self.tool_cache.get(&cache_key).await {
            match serde_json::from_value::<Vec<DocumentationResult>>(cached) {
                Ok(results) => {
                    tracing::info!(query, result_count = results.len(), "Documentation search served from cache");
                    return Ok(results);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Cached search result unreadable, re-searching");
                }
            }
        }

        tracing::info!(query, ?frameworks, top_k, min_score, "Documentation search started");
        let start = std::time::Instant::now();

        // Over-fetch so the re-ranker has headroom to reorder.
        let query_embedding = self.embedder.embed(query).await?;
        let initial = self
            .index
            .search_documentation(&query_embedding, frameworks, top_k * 2, min_score)
            .await?;

        if initial.is_empty() {
            tracing::info!(query, "No documentation results");
            self.tool_cache
                .set(&cache_key, &json!([]), Some(RESULT_CACHE_TTL))
                .await;
            return Ok(Vec::new());
        }

        let reranked = self.rerank_or_keep(query, initial, Some(top_k)).await;

        let max_score = DocumentationResult::max_score(&reranked);
        let final_results = if max_score < self.self_correction_threshold {
            tracing::info!(
                query,
                max_score,
                threshold = self.self_correction_threshold,
                "Low retrieval confidence, running self-correction"
            );
            metrics::counter!("doc_search.self_corrections").increment(1);

            let corrected = self.self_correct(query, &reranked).await;
            let corrected_max = DocumentationResult::max_score(&corrected);
            if corrected_max > max_score {
                tracing::info!(
                    query,
                    original_max_score = max_score,
                    corrected_max_score = corrected_max,
                    "Self-correction improved results"
                );
                corrected
            } else {
                tracing::info!(
                    query,
                    original_max_score = max_score,
                    corrected_max_score = corrected_max,
                    "Self-correction did not improve results, keeping original"
                );
                reranked
            }
        } else {
            reranked
        };

        match serde_json::to_value(&final_results) {
            Ok(serialized) => {
                self.tool_cache
                    .set(&cache_key, &serialized, Some(RESULT_CACHE_TTL))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Search results not serializable, skipping cache");
            }
        }

        metrics::histogram!("doc_search.latency").record(start.elapsed().as_secs_f64());
        tracing::info!(
            query,
            result_count = final_results.len(),
            max_score = DocumentationResult::max_score(&final_results),
            "Documentation search complete"
        );

        Ok(final_results)
    }

    /// Re-rank, or fall back to the retrieval ordering when the
    /// cross-encoder fails. Losing the re-rank only costs relevance.
    async fn rerank_or_keep(
        &self,
        query: &str,
        results: Vec<DocumentationResult>,
        top_k: Option<usize>,
    ) -> Vec<DocumentationResult> {
        match self.reranker.rerank(query, &results, top_k).await {
            Ok(reranked) => reranked,
            Err(e) => {
                tracing::warn!(error = %e, "Re-ranking failed, keeping retrieval order");
                metrics::counter!("doc_search.rerank_failures").increment(1);
                let mut kept = results;
                if let Some(top_k) = top_k {
                    kept.truncate(top_k);
                }
                kept
            }
        }
    }

    /// One-shot query reformulation: widen the query with the frameworks
    /// seen in the current top results (or generic documentation terms),
    /// re-search with looser bounds, and re-rank against the original
    /// query. Runs at most once per search; any failure keeps the
    /// original results.
    async fn self_correct(
        &self,
        query: &str,
        current: &[DocumentationResult],
    ) -> Vec<DocumentationResult> {
        // Frameworks present in the top 3 results, first-seen order.
        let mut frameworks: Vec<String> = Vec::new();
        for result in current.iter().take(3) {
            if !frameworks.contains(&result.framework) {
                frameworks.push(result.framework.clone());
            }
        }

        let refined_query = if frameworks.is_empty() {
            format!("{} example code documentation", query)
        } else {
            format!("{} {}", query, frameworks.join(" "))
        };

        tracing::info!(
            original_query = query,
            refined_query = refined_query.as_str(),
            ?frameworks,
            "Self-correction query refined"
        );

        let refined_embedding = match self.embedder.embed(&refined_query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "Self-correction embedding failed, keeping original results");
                return current.to_vec();
            }
        };

        let framework_filter = if frameworks.is_empty() {
            None
        } else {
            Some(frameworks.as_slice())
        };

        let corrected = match self
            .index
            .search_documentation(&refined_embedding, framework_filter, 20, 0.5)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "Self-correction search failed, keeping original results");
                return current.to_vec();
            }
        };

        if corrected.is_empty() {
            tracing::info!(refined_query = refined_query.as_str(), "Self-correction found no results");
            return current.to_vec();
        }

        // Re-rank against the original query: relevance is judged on what
        // the user actually asked.
        self.rerank_or_keep(query, corrected, Some(10)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvError, KvStore};
    use crate::rerank::{CrossEncoder, RerankError};
    use std::collections::{HashMap, VecDeque};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryKv {
        entries: Mutex<HashMap<String, String>>,
    }

    impl KvStore for MemoryKv {
        fn get<'a>(
            &'a self,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<String>, KvError>> + Send + 'a>> {
            Box::pin(async move { Ok(self.entries.lock().unwrap().get(key).cloned()) })
        }

        fn set_ex<'a>(
            &'a self,
            key: &'a str,
            value: &'a str,
            _ttl_seconds: u64,
        ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + 'a>> {
            Box::pin(async move {
                self.entries
                    .lock()
                    .unwrap()
                    .insert(key.to_string(), value.to_string());
                Ok(())
            })
        }

        fn delete<'a>(
            &'a self,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + 'a>> {
            Box::pin(async move {
                self.entries.lock().unwrap().remove(key);
                Ok(())
            })
        }

        fn delete_prefix<'a>(
            &'a self,
            prefix: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<u64, KvError>> + Send + 'a>> {
            Box::pin(async move {
                let mut entries = self.entries.lock().unwrap();
                let before = entries.len();
                entries.retain(|k, _| !k.starts_with(prefix));
                Ok((before - entries.len()) as u64)
            })
        }
    }

    /// Documentation index fake: hands out queued responses in order and
    /// records call arguments.
    #[derive(Default)]
    struct SequencedIndex {
        responses: Mutex<VecDeque<Vec<DocumentationResult>>>,
        calls: Mutex<Vec<(Option<Vec<String>>, usize, f64)>>,
    }

    impl SequencedIndex {
        fn queue(&self, results: Vec<DocumentationResult>) {
            self.responses.lock().unwrap().push_back(results);
        }
    }

    impl DocumentationIndex for SequencedIndex {
        fn search_documentation<'a>(
            &'a self,
            _query_embedding: &'a [f32],
            frameworks: Option<&'a [String]>,
            top_k: usize,
            min_score: f64,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<DocumentationResult>, StoreError>> + Send + 'a>>
        {
            let frameworks = frameworks.map(|f| f.to_vec());
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push((frameworks, top_k, min_score));
                Ok(self
                    .responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_default())
            })
        }
    }

    /// Cross-encoder fake scoring by document content.
    struct ScoreByContent(HashMap<String, f32>);

    impl CrossEncoder for ScoreByContent {
        fn score_pairs<'a>(
            &'a self,
            _query: &'a str,
            documents: &'a [String],
        ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, RerankError>> + Send + 'a>> {
            Box::pin(async move {
                Ok(documents
                    .iter()
                    .map(|d| self.0.get(d).copied().unwrap_or(0.0))
                    .collect())
            })
        }
    }

    struct FixedEmbedder;

    impl Embedder for FixedEmbedder {
        fn embed<'a>(
            &'a self,
            _text: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbeddingError>> + Send + 'a>> {
            Box::pin(async { Ok(vec![0.1, 0.2, 0.3]) })
        }

        fn embed_batch<'a>(
            &'a self,
            texts: &'a [String],
        ) -> Pin<
            Box<dyn Future<Output = Result<Vec<Option<Vec<f32>>>, EmbeddingError>> + Send + 'a>,
        > {
            Box::pin(async move { Ok(texts.iter().map(|_| Some(vec![0.1, 0.2, 0.3])).collect()) })
        }

        fn dimensions(&self) -> u32 {
            3
        }
    }

    fn doc(content: &str, score: f64, framework: &str) -> DocumentationResult {
        DocumentationResult {
            content: content.to_string(),
            score,
            metadata: json!({}),
            source: format!("https://docs.example.com/{}", content),
            framework: framework.to_string(),
        }
    }

    fn agent(index: Arc<SequencedIndex>, scores: HashMap<String, f32>) -> DocumentationSearchAgent {
        DocumentationSearchAgent::new(
            index,
            Arc::new(Reranker::new(Arc::new(ScoreByContent(scores)))),
            Arc::new(FixedEmbedder),
            Arc::new(ToolCache::new(Arc::new(MemoryKv::default()), 300)),
            0.7,
        )
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let a = agent(Arc::new(SequencedIndex::default()), HashMap::new());
        let err = a.search("  ", None, 10, 0.7).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_overfetches_then_truncates_to_top_k() {
        let index = Arc::new(SequencedIndex::default());
        // High-confidence results: no self-correction.
        index.queue(vec![
            doc("a", 0.9, "NestJS"),
            doc("b", 0.85, "NestJS"),
            doc("c", 0.8, "NestJS"),
        ]);
        let scores = HashMap::from([
            ("a".to_string(), 4.0),
            ("b".to_string(), 3.0),
            ("c".to_string(), 2.0),
        ]);

        let a = agent(index.clone(), scores);
        let results = a.search("controllers", None, 2, 0.7).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "a");

        let calls = index.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        // top_k × 2 headroom for the re-ranker.
        assert_eq!(calls[0].1, 4);
    }

    #[tokio::test]
    async fn test_empty_results_cached_and_returned() {
        let index = Arc::new(SequencedIndex::default());
        index.queue(vec![]);

        let a = agent(index.clone(), HashMap::new());
        let results = a.search("nothing indexed", None, 10, 0.7).await.unwrap();
        assert!(results.is_empty());

        // Second call served from the tool cache: index untouched.
        let results = a.search("nothing indexed", None, 10, 0.7).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(index.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_search_hits_tool_cache() {
        let index = Arc::new(SequencedIndex::default());
        index.queue(vec![doc("a", 0.9, "NestJS")]);
        let scores = HashMap::from([("a".to_string(), 4.0)]);

        let a = agent(index.clone(), scores);
        let first = a.search("controllers", None, 10, 0.7).await.unwrap();
        let second = a.search("controllers", None, 10, 0.7).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(index.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_self_correction_adopts_improved_results() {
        let index = Arc::new(SequencedIndex::default());
        // Initial search: weak match for a NestJS doc.
        index.queue(vec![doc("weak", 0.55, "NestJS")]);
        // Corrected search: a strong match.
        index.queue(vec![doc("strong", 0.8, "NestJS")]);

        // sigmoid(0.2007) ≈ 0.55, sigmoid(1.516) ≈ 0.82.
        let scores = HashMap::from([
            ("weak".to_string(), 0.2007f32),
            ("strong".to_string(), 1.516f32),
        ]);

        let a = agent(index.clone(), scores);
        let results = a.search("guards", None, 10, 0.7).await.unwrap();

        assert_eq!(results[0].content, "strong");
        assert!((results[0].score - 0.82).abs() < 0.005);
        assert!(results.iter().any(|r| r.framework == "NestJS"));

        // The corrected search widened its bounds and filtered by the
        // frameworks extracted from the initial results.
        let calls = index.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0.as_deref(), Some(&["NestJS".to_string()][..]));
        assert_eq!(calls[1].1, 20);
        assert_eq!(calls[1].2, 0.5);
    }

    #[tokio::test]
    async fn test_self_correction_keeps_original_when_not_better() {
        let index = Arc::new(SequencedIndex::default());
        index.queue(vec![doc("weak", 0.55, "NestJS")]);
        index.queue(vec![doc("weaker", 0.5, "NestJS")]);

        let scores = HashMap::from([
            ("weak".to_string(), 0.2f32),
            ("weaker".to_string(), -1.0f32),
        ]);

        let a = agent(index.clone(), scores);
        let results = a.search("guards", None, 10, 0.7).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "weak");
    }

    #[tokio::test]
    async fn test_high_confidence_skips_self_correction() {
        let index = Arc::new(SequencedIndex::default());
        index.queue(vec![doc("a", 0.9, "NestJS")]);
        let scores = HashMap::from([("a".to_string(), 4.0f32)]);

        let a = agent(index.clone(), scores);
        a.search("controllers", None, 10, 0.7).await.unwrap();

        // Only the initial search ran.
        assert_eq!(index.calls.lock().unwrap().len(), 1);
    }
}
