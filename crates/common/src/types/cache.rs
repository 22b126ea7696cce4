use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached workflow response as returned from a cache lookup.
///
/// `similarity_score` is set at read time: exactly 1.0 for an exact-key hit,
/// the measured cosine similarity (≥ the active threshold) for a vector hit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedResponse {
    pub response: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub similarity_score: f64,
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}
