use std::future::Future;
use std::pin::Pin;

use redis::aio::MultiplexedConnection;

/// Redis client for the cache keyspaces (`semantic_cache:*`, `tool_cache:*`).
pub struct KvClient {
    conn: MultiplexedConnection,
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),
}

impl From<KvError> for devdocs_common::DevDocsError {
    fn from(e: KvError) -> Self {
        devdocs_common::DevDocsError::CacheBackend(e.to_string())
    }
}

impl KvClient {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn connect(redis_url: &str) -> Result<Self, KvError> {
        tracing::info!("Connecting to Redis");

        let client =
            redis::Client::open(redis_url).map_err(|e| KvError::Connection(e.to_string()))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;

        let kv = Self { conn };
        kv.health_check().await?;
        tracing::info!("Redis connection established");

        Ok(kv)
    }

    /// Verify the connection is alive (PING).
    pub async fn health_check(&self) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))?;

        if pong != "PONG" {
            return Err(KvError::Command(format!(
                "Unexpected PING response: {}",
                pong
            )));
        }
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))
    }

    async fn set_value(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_seconds)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))?;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))?;
        Ok(())
    }

    /// Delete every key matching `{prefix}*`. Returns the number removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, KvError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}*", prefix))
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))?;

        if keys.is_empty() {
            return Ok(0);
        }

        let count = keys.len() as u64;
        let mut del = redis::cmd("DEL");
        for key in &keys {
            del.arg(key);
        }
        let _: i64 = del
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))?;

        Ok(count)
    }
}

/// Object-safe seam over the key-value store (dyn dispatch).
/// Tests provide in-memory or failing fakes; production uses KvClient.
pub trait KvStore: Send + Sync {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, KvError>> + Send + 'a>>;

    fn set_ex<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + 'a>>;

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + 'a>>;

    fn delete_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, KvError>> + Send + 'a>>;
}

impl KvStore for KvClient {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, KvError>> + Send + 'a>> {
        Box::pin(self.get_value(key))
    }

    fn set_ex<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl_seconds: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + 'a>> {
        Box::pin(self.set_value(key, value, ttl_seconds))
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + 'a>> {
        Box::pin(self.delete_key(key))
    }

    fn delete_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, KvError>> + Send + 'a>> {
        Box::pin(self.delete_by_prefix(prefix))
    }
}
