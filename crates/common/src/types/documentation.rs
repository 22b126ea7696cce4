use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored documentation chunk, written by the ingestion pipeline and
/// read-only to the engine. Unique per (framework, source).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentationChunk {
    pub id: i64,
    pub content: String,
    /// Not retrieved in search queries (large); populated only where a
    /// caller explicitly asks for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// URL or path the chunk was ingested from.
    pub source: String,
    pub framework: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An in-flight search result. `score` is a normalized relevance in [0, 1]:
/// cosine similarity out of the vector store, replaced by the cross-encoder
/// score after re-ranking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentationResult {
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Value,
    pub source: String,
    pub framework: String,
}

impl DocumentationResult {
    /// Highest score in a result list, or 0.0 for an empty list.
    pub fn max_score(results: &[DocumentationResult]) -> f64 {
        results.iter().map(|r| r.score).fold(0.0, f64::max)
    }
}
