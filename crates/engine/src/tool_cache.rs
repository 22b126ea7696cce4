use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::kv::KvStore;

/// TTL'd cache for expensive tool-call results (documentation searches).
///
/// Keys are derived deterministically from the tool name and canonicalized
/// parameters, so equivalent calls hit the same entry regardless of how the
/// parameter map was built. Every operation degrades gracefully: a backend
/// failure is logged and reported as a miss / no-store, never as an error.
pub struct ToolCache {
    kv: Arc<dyn KvStore>,
    default_ttl: u64,
}

const KEY_PREFIX: &str = "tool_cache";

impl ToolCache {
    pub fn new(kv: Arc<dyn KvStore>, default_ttl: u64) -> Self {
        Self { kv, default_ttl }
    }

    /// Deterministic cache key:
    /// `tool_cache:{tool}:{sha256(tool + canonical_json(params))[..16]}`.
    pub fn generate_cache_key(tool_name: &str, params: &Value) -> String {
        let canonical = canonical_json(params);
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", tool_name, canonical).as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}:{}:{}", KEY_PREFIX, tool_name, &hex[..16])
    }

    /// Look up a cached tool result. Returns the stored result value, or
    /// None on miss or backend failure.
    pub async fn get(&self, cache_key: &str) -> Option<Value> {
        match self.kv.get(cache_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(mut entry) => {
                    metrics::counter!("tool_cache.hits").increment(1);
                    tracing::debug!(cache_key, "Tool cache hit");
                    Some(entry.get_mut("result").map(Value::take).unwrap_or(Value::Null))
                }
                Err(e) => {
                    tracing::warn!(cache_key, error = %e, "Corrupt tool cache entry, treating as miss");
                    None
                }
            },
            Ok(None) => {
                metrics::counter!("tool_cache.misses").increment(1);
                None
            }
            Err(e) => {
                tracing::warn!(
                    cache_key,
                    error = %e,
                    "Tool cache get failed, continuing without cache"
                );
                metrics::counter!("tool_cache.errors", "op" => "get").increment(1);
                None
            }
        }
    }

    /// Store a tool result with the given TTL (default when None).
    /// Returns false on backend failure without propagating it.
    pub async fn set(&self, cache_key: &str, result: &Value, ttl: Option<u64>) -> bool {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = json!({
            "result": result,
            "cached_at": Utc::now().to_rfc3339(),
            "ttl": ttl,
        });

        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(cache_key, error = %e, "Tool result not serializable, skipping cache");
                return false;
            }
        };

        match self.kv.set_ex(cache_key, &raw, ttl).await {
            Ok(()) => {
                tracing::debug!(cache_key, ttl, "Tool result cached");
                true
            }
            Err(e) => {
                tracing::warn!(
                    cache_key,
                    error = %e,
                    "Tool cache set failed, continuing without caching"
                );
                metrics::counter!("tool_cache.errors", "op" => "set").increment(1);
                false
            }
        }
    }

    /// Remove one entry. Returns false on backend failure.
    pub async fn delete(&self, cache_key: &str) -> bool {
        match self.kv.delete(cache_key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(cache_key, error = %e, "Tool cache delete failed");
                metrics::counter!("tool_cache.errors", "op" => "delete").increment(1);
                false
            }
        }
    }

    /// Remove every `tool_cache:*` entry. Returns false on backend failure.
    pub async fn clear(&self) -> bool {
        match self.kv.delete_prefix(&format!("{}:", KEY_PREFIX)).await {
            Ok(count) => {
                tracing::info!(entries_cleared = count, "Tool cache cleared");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Tool cache clear failed");
                false
            }
        }
    }

    /// Look up by (tool, params); on miss run `fetch`, store its result
    /// best-effort, and return it.
    ///
    /// Cache failures on either side are swallowed; an error from `fetch`
    /// is the only error this returns.
    pub async fn get_or_set<E, F, Fut>(
        &self,
        tool_name: &str,
        params: &Value,
        fetch: F,
        ttl: Option<u64>,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let cache_key = Self::generate_cache_key(tool_name, params);

        if let Some(cached) = self.get(&cache_key).await {
            return Ok(cached);
        }

        let result = fetch().await?;
        self.set(&cache_key, &result, ttl).await;
        Ok(result)
    }
}

/// Serialize a JSON value with object keys sorted recursively, so logically
/// equal parameter maps always produce the same byte string.
fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sort(v))).collect();
                Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}
