use serde::{Deserialize, Serialize};

use super::EmbeddingError;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: u32,
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a batch to an OpenAI-compatible embeddings endpoint.
pub async fn call_embeddings(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    dimensions: u32,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let start = std::time::Instant::now();
    let url = format!("{}/embeddings", base_url.trim_end_matches('/'));

    let request = EmbeddingRequest {
        model,
        input: texts,
        dimensions,
        encoding_format: "float",
    };

    let response = http
        .post(&url)
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| EmbeddingError::Http(e.to_string()))?;

    let status = response.status();
    metrics::histogram!("embedding.api.latency", "model" => model.to_string())
        .record(start.elapsed().as_secs_f64());

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::Auth(format!("{}: {}", status, body)));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let body = response.text().await.unwrap_or_default();
        if let Ok(parsed) = serde_json::from_str::<ApiError>(&body) {
            if parsed.error.code.as_deref() == Some("insufficient_quota") {
                return Err(EmbeddingError::QuotaExceeded(parsed.error.message));
            }
        }
        return Err(EmbeddingError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let msg = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(EmbeddingError::Api(format!("{}: {}", status, msg)));
    }

    let body: EmbeddingResponse = response
        .json()
        .await
        .map_err(|e| EmbeddingError::Api(format!("Failed to parse embedding response: {}", e)))?;

    // The API documents index-aligned data but does not guarantee order.
    let mut data = body.data;
    data.sort_by_key(|d| d.index);

    Ok(data.into_iter().map(|d| d.embedding).collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
