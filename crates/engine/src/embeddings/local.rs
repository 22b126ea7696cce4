use std::sync::{Arc, Mutex};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::EmbeddingError;

/// In-process embedding model via fastembed (ONNX Runtime). CPU-bound and
/// not documented thread-safe, so inference is serialized behind a mutex
/// and runs on the blocking pool.
pub struct LocalEmbeddingModel {
    model: Arc<Mutex<TextEmbedding>>,
}

impl LocalEmbeddingModel {
    /// Load the named model. Fails up front on an unknown name so
    /// misconfiguration is caught at startup, not mid-request.
    pub fn load(model_name: &str) -> Result<Self, EmbeddingError> {
        let kind = match model_name {
            "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            "all-MiniLM-L12-v2" => EmbeddingModel::AllMiniLML12V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            other => {
                return Err(EmbeddingError::Model(format!(
                    "Unknown local embedding model: {}",
                    other
                )))
            }
        };

        tracing::info!(model = model_name, "Loading local embedding model");

        let model = TextEmbedding::try_new(
            InitOptions::new(kind).with_show_download_progress(false),
        )
        .map_err(|e| EmbeddingError::Model(format!("Failed to load embedding model: {}", e)))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }

    /// Embed a batch on the blocking pool.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = Arc::clone(&self.model);

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingError::Model("Embedding model lock poisoned".into()))?;
            model
                .embed(texts, None)
                .map_err(|e| EmbeddingError::Model(format!("Local inference failed: {}", e)))
        })
        .await
        .map_err(|e| EmbeddingError::Model(format!("Embedding task panicked: {}", e)))?
    }
}
