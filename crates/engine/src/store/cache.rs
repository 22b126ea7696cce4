use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::Row;

use devdocs_common::types::CachedResponse;

use super::{StoreError, VectorStore};

impl VectorStore {
    /// Find the single closest cached response whose cosine similarity to
    /// `embedding` is at least `threshold`. Returns the row and its
    /// measured similarity.
    pub async fn search_cache_by_embedding(
        &self,
        embedding: &[f32],
        threshold: f64,
    ) -> Result<Option<(CachedResponse, f64)>, StoreError> {
        self.guarded(|| self.search_cache_once(embedding, threshold))
            .await
    }

    async fn search_cache_once(
        &self,
        embedding: &[f32],
        threshold: f64,
    ) -> Result<Option<(CachedResponse, f64)>, StoreError> {
        let query_vec = Vector::from(embedding.to_vec());

        let row = sqlx::query(
            r#"
            SELECT prompt, response, embedding, cached_at, ttl,
                   1 - (embedding <=> $1::vector) AS similarity
            FROM semantic_cache
            WHERE 1 - (embedding <=> $1::vector) >= $2
            ORDER BY similarity DESC
            LIMIT 1
            "#,
        )
        .bind(&query_vec)
        .bind(threshold)
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let similarity: f64 = row
            .try_get("similarity")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let stored: Vector = row
            .try_get("embedding")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let cached_at: DateTime<Utc> = row
            .try_get("cached_at")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let ttl: i32 = row
            .try_get("ttl")
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let cached = CachedResponse {
            response: row
                .try_get("response")
                .map_err(|e| StoreError::Query(e.to_string()))?,
            embedding: stored.to_vec(),
            similarity_score: similarity,
            cached_at,
            ttl_seconds: ttl.max(0) as u64,
        };

        Ok(Some((cached, similarity)))
    }

    /// Insert or replace a cached response by prompt key. The last writer
    /// wins; concurrent requests for the same prompt converge on one row.
    pub async fn upsert_cache(
        &self,
        prompt: &str,
        response: &str,
        embedding: &[f32],
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        self.guarded(|| self.upsert_cache_once(prompt, response, embedding, ttl_seconds))
            .await
    }

    async fn upsert_cache_once(
        &self,
        prompt: &str,
        response: &str,
        embedding: &[f32],
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        let embedding_vec = Vector::from(embedding.to_vec());

        sqlx::query(
            r#"
            INSERT INTO semantic_cache (prompt, response, embedding, cached_at, ttl)
            VALUES ($1, $2, $3::vector, $4, $5)
            ON CONFLICT (prompt) DO UPDATE
            SET response = EXCLUDED.response,
                embedding = EXCLUDED.embedding,
                cached_at = EXCLUDED.cached_at,
                ttl = EXCLUDED.ttl
            "#,
        )
        .bind(prompt)
        .bind(response)
        .bind(&embedding_vec)
        .bind(Utc::now())
        .bind(ttl_seconds as i32)
        .execute(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        metrics::counter!("store.cache.upserts").increment(1);
        Ok(())
    }

    /// Remove every cached response.
    pub async fn truncate_cache(&self) -> Result<(), StoreError> {
        self.guarded(|| async {
            sqlx::query("DELETE FROM semantic_cache")
                .execute(self.pool())
                .await
                .map_err(StoreError::from_sqlx)?;
            Ok(())
        })
        .await
    }
}
