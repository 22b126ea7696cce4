use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};

use devdocs_common::types::CachedResponse;

use crate::kv::KvStore;
use crate::store::CacheIndex;

/// Two-tier response cache: exact prompt matches in the key-value store,
/// similarity matches in the vector store.
///
/// The cache only ever changes request latency, never results: every
/// operation degrades to a miss / no-store on backend failure and nothing
/// here returns an error to the caller.
pub struct SemanticCache {
    kv: Arc<dyn KvStore>,
    index: Arc<dyn CacheIndex>,
    similarity_threshold: f64,
    default_ttl: u64,
}

const KEY_PREFIX: &str = "semantic_cache";

impl SemanticCache {
    pub fn new(
        kv: Arc<dyn KvStore>,
        index: Arc<dyn CacheIndex>,
        similarity_threshold: f64,
        default_ttl: u64,
    ) -> Self {
        Self {
            kv,
            index,
            similarity_threshold,
            default_ttl,
        }
    }

    /// Deterministic exact-match key: `semantic_cache:{sha256(prompt)}`.
    fn cache_key(prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}:{}", KEY_PREFIX, hex)
    }

    /// Exact-tier-only lookup. Without an embedding there is nothing to
    /// run a similarity search with, so a tier-1 miss is a miss; callers
    /// wanting tier 2 use `get_with_embedding`.
    pub async fn get(&self, prompt: &str) -> Option<CachedResponse> {
        self.exact_lookup(prompt).await.unwrap_or(None)
    }

    /// Full two-tier lookup: exact match first (similarity 1.0), then the
    /// best vector match at or above the threshold (measured similarity).
    pub async fn get_with_embedding(
        &self,
        prompt: &str,
        embedding: &[f32],
        similarity_threshold: Option<f64>,
    ) -> Option<CachedResponse> {
        let threshold = similarity_threshold.unwrap_or(self.similarity_threshold);

        match self.exact_lookup(prompt).await {
            Ok(Some(cached)) => return Some(cached),
            Ok(None) => {}
            // Tier-1 backend down: report a miss rather than half a cache.
            Err(()) => return None,
        }

        match self.index.search_by_embedding(embedding, threshold).await {
            Ok(Some((mut cached, similarity))) => {
                cached.similarity_score = similarity;
                metrics::counter!("semantic_cache.hits", "tier" => "similarity").increment(1);
                tracing::info!(
                    similarity,
                    prompt_preview = preview(prompt),
                    "Semantic cache hit (similarity)"
                );
                Some(cached)
            }
            Ok(None) => {
                metrics::counter!("semantic_cache.misses").increment(1);
                None
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Cache backend connection failed, continuing without cache"
                );
                metrics::counter!("semantic_cache.backend_errors", "tier" => "vector").increment(1);
                None
            }
        }
    }

    /// Tier-1 lookup. Ok(None) is a clean miss; Err(()) means the backend
    /// failed and the error was already logged.
    async fn exact_lookup(&self, prompt: &str) -> Result<Option<CachedResponse>, ()> {
        let key = Self::cache_key(prompt);

        let raw = match self.kv.get(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Cache backend connection failed, continuing without cache"
                );
                metrics::counter!("semantic_cache.backend_errors", "tier" => "exact").increment(1);
                return Err(());
            }
        };

        let Some(raw) = raw else {
            return Ok(None);
        };

        match parse_entry(&raw) {
            Some(cached) => {
                metrics::counter!("semantic_cache.hits", "tier" => "exact").increment(1);
                tracing::info!(
                    prompt_preview = preview(prompt),
                    "Semantic cache hit (exact)"
                );
                Ok(Some(cached))
            }
            None => {
                tracing::warn!(key = key.as_str(), "Corrupt semantic cache entry, treating as miss");
                Ok(None)
            }
        }
    }

    /// Store a response in both tiers. One tier succeeding is enough;
    /// returns false (and logs) only when both writes fail.
    pub async fn set(
        &self,
        prompt: &str,
        response: &str,
        embedding: &[f32],
        ttl: Option<u64>,
    ) -> bool {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let key = Self::cache_key(prompt);

        let entry = json!({
            "response": response,
            "embedding": embedding,
            "cached_at": Utc::now().to_rfc3339(),
            "ttl": ttl,
        });

        let kv_ok = match serde_json::to_string(&entry) {
            Ok(raw) => match self.kv.set_ex(&key, &raw, ttl).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Semantic cache exact-tier write failed");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Semantic cache entry not serializable");
                false
            }
        };

        let index_ok = match self.index.upsert(prompt, response, embedding, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Semantic cache vector-tier write failed");
                false
            }
        };

        if kv_ok || index_ok {
            metrics::counter!("semantic_cache.writes").increment(1);
            true
        } else {
            tracing::warn!("Semantic cache write failed in both tiers");
            metrics::counter!("semantic_cache.backend_errors", "tier" => "both").increment(1);
            false
        }
    }

    /// Remove every cached response from both tiers.
    pub async fn clear(&self) -> bool {
        let kv_ok = match self.kv.delete_prefix(&format!("{}:", KEY_PREFIX)).await {
            Ok(count) => {
                tracing::info!(entries_cleared = count, backend = "kv", "Semantic cache cleared");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Semantic cache kv clear failed");
                false
            }
        };

        let index_ok = match self.index.truncate().await {
            Ok(()) => {
                tracing::info!(backend = "vector", "Semantic cache cleared");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Semantic cache vector clear failed");
                false
            }
        };

        kv_ok && index_ok
    }
}

fn preview(prompt: &str) -> String {
    prompt.chars().take(50).collect()
}

fn parse_entry(raw: &str) -> Option<CachedResponse> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let response = value.get("response")?.as_str()?.to_string();
    let embedding: Vec<f32> = value
        .get("embedding")?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();
    let cached_at: DateTime<Utc> = value
        .get("cached_at")?
        .as_str()?
        .parse()
        .unwrap_or_else(|_| Utc::now());
    let ttl_seconds = value.get("ttl")?.as_u64()?;

    Some(CachedResponse {
        response,
        embedding,
        similarity_score: 1.0,
        cached_at,
        ttl_seconds,
    })
}
