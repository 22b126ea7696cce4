use serde::{Deserialize, Serialize};

use super::{ChatCompletion, LlmError};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u64,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a system+user exchange to a Gemini-style generateContent endpoint.
///
/// Gemini has no separate system role; the system text is folded into the
/// first user turn.
#[allow(clippy::too_many_arguments)]
pub async fn send_generate_content(
    http: &reqwest::Client,
    base_url: Option<&str>,
    api_key: &str,
    model: &str,
    max_tokens: u32,
    temperature: f64,
    system: &str,
    user: &str,
) -> Result<ChatCompletion, LlmError> {
    let start = std::time::Instant::now();
    let url = format!(
        "{}/models/{}:generateContent",
        base_url.unwrap_or(GEMINI_BASE_URL).trim_end_matches('/'),
        model
    );

    let combined = if system.is_empty() {
        user.to_string()
    } else {
        format!("{}\n\n{}", system, user)
    };

    let request = GenerateRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts: vec![Part { text: combined }],
        }],
        generation_config: GenerationConfig {
            temperature,
            max_output_tokens: max_tokens,
        },
    };

    let response = http
        .post(&url)
        .query(&[("key", api_key)])
        .json(&request)
        .send()
        .await
        .map_err(LlmError::from_reqwest)?;

    let status = response.status();
    metrics::histogram!("llm.api.latency", "provider" => "gemini", "model" => model.to_string())
        .record(start.elapsed().as_secs_f64());

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Auth(format!("{}: {}", status, body)));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return Err(LlmError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Api(format!("{}: {}", status, body)));
    }

    let body: GenerateResponse = response
        .json()
        .await
        .map_err(|e| LlmError::Parse(format!("Failed to parse Gemini response: {}", e)))?;

    let text = body
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content.parts.into_iter().next())
        .map(|p| p.text)
        .ok_or_else(|| LlmError::Parse("No candidates in Gemini response".into()))?;

    let tokens_used = body
        .usage_metadata
        .map(|u| u.total_token_count)
        .unwrap_or(0);

    metrics::counter!("llm.api.total_tokens", "provider" => "gemini").increment(tokens_used);

    Ok(ChatCompletion { text, tokens_used })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
