use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde_json::Value;
use sqlx::Row;

use devdocs_common::types::{DocumentationChunk, DocumentationResult};

use super::{StoreError, VectorStore};

impl VectorStore {
    /// Cosine-similarity search over the documentation table, under the
    /// breaker and retry policy. Results come back ordered by descending
    /// similarity; rows below `min_score` are dropped and the rest
    /// truncated to `top_k`.
    pub async fn search_documentation_guarded(
        &self,
        query_embedding: &[f32],
        frameworks: Option<&[String]>,
        top_k: usize,
        min_score: f64,
    ) -> Result<Vec<DocumentationResult>, StoreError> {
        self.guarded(|| self.search_documentation_once(query_embedding, frameworks, top_k, min_score))
            .await
    }

    async fn search_documentation_once(
        &self,
        query_embedding: &[f32],
        frameworks: Option<&[String]>,
        top_k: usize,
        min_score: f64,
    ) -> Result<Vec<DocumentationResult>, StoreError> {
        let start = std::time::Instant::now();
        let query_vec = Vector::from(query_embedding.to_vec());

        // <=> is pgvector's cosine distance; similarity = 1 − distance.
        let rows = if let Some(frameworks) = frameworks {
            sqlx::query(
                r#"
                SELECT content, source, framework, section, version, metadata,
                       1 - (embedding <=> $1::vector) AS similarity_score
                FROM framework_documentation
                WHERE framework = ANY($3)
                ORDER BY embedding <=> $1::vector
                LIMIT $2
                "#,
            )
            .bind(&query_vec)
            .bind(top_k as i64)
            .bind(frameworks)
            .fetch_all(self.pool())
            .await
        } else {
            sqlx::query(
                r#"
                SELECT content, source, framework, section, version, metadata,
                       1 - (embedding <=> $1::vector) AS similarity_score
                FROM framework_documentation
                ORDER BY embedding <=> $1::vector
                LIMIT $2
                "#,
            )
            .bind(&query_vec)
            .bind(top_k as i64)
            .fetch_all(self.pool())
            .await
        }
        .map_err(StoreError::from_sqlx)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let score: f64 = row
                .try_get("similarity_score")
                .map_err(|e| StoreError::Query(e.to_string()))?;

            if score < min_score {
                continue;
            }

            let mut metadata: Value = row
                .try_get::<Option<Value>, _>("metadata")
                .map_err(|e| StoreError::Query(e.to_string()))?
                .unwrap_or_else(|| Value::Object(Default::default()));

            // Fold the optional columns into the metadata bag.
            if let Value::Object(map) = &mut metadata {
                if let Ok(Some(section)) = row.try_get::<Option<String>, _>("section") {
                    map.insert("section".to_string(), Value::String(section));
                }
                if let Ok(Some(version)) = row.try_get::<Option<String>, _>("version") {
                    map.insert("version".to_string(), Value::String(version));
                }
            }

            results.push(DocumentationResult {
                content: row
                    .try_get("content")
                    .map_err(|e| StoreError::Query(e.to_string()))?,
                score,
                metadata,
                source: row
                    .try_get("source")
                    .map_err(|e| StoreError::Query(e.to_string()))?,
                framework: row
                    .try_get("framework")
                    .map_err(|e| StoreError::Query(e.to_string()))?,
            });
        }

        metrics::histogram!("store.search.latency").record(start.elapsed().as_secs_f64());
        metrics::counter!("store.search.results").increment(results.len() as u64);

        Ok(results)
    }

    /// Fetch one stored documentation chunk by id. The embedding column is
    /// not retrieved (large).
    pub async fn get_chunk(&self, id: i64) -> Result<Option<DocumentationChunk>, StoreError> {
        self.guarded(|| async {
            let row = sqlx::query(
                r#"
                SELECT id, content, source, framework, section, version, metadata,
                       created_at, updated_at
                FROM framework_documentation
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(StoreError::from_sqlx)?;

            let Some(row) = row else {
                return Ok(None);
            };

            let get_err = |e: sqlx::Error| StoreError::Query(e.to_string());

            Ok(Some(DocumentationChunk {
                id: row.try_get("id").map_err(get_err)?,
                content: row.try_get("content").map_err(get_err)?,
                embedding: None,
                source: row.try_get("source").map_err(get_err)?,
                framework: row.try_get("framework").map_err(get_err)?,
                section: row.try_get("section").map_err(get_err)?,
                version: row.try_get("version").map_err(get_err)?,
                metadata: row
                    .try_get::<Option<Value>, _>("metadata")
                    .map_err(get_err)?
                    .unwrap_or_else(|| Value::Object(Default::default())),
                created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(get_err)?,
                updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(get_err)?,
            }))
        })
        .await
    }
}
