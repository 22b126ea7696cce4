use serde::{Deserialize, Serialize};

use super::{ChatCompletion, LlmError};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a system+user chat completion to an OpenAI-compatible endpoint.
#[allow(clippy::too_many_arguments)]
pub async fn send_chat_completion(
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
        "{}/chat/completions",
        base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/')
    );

    let request = ChatRequest {
        model,
        max_tokens,
        temperature,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ],
    };

    let response = http
        .post(&url)
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await
        .map_err(LlmError::from_reqwest)?;

    let status = response.status();
    metrics::histogram!("llm.api.latency", "provider" => "openai", "model" => model.to_string())
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

        let body = response.text().await.unwrap_or_default();
        if let Ok(parsed) = serde_json::from_str::<OpenAiError>(&body) {
            if parsed.error.code.as_deref() == Some("insufficient_quota") {
                return Err(LlmError::QuotaExceeded(parsed.error.message));
            }
        }
        return Err(LlmError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let msg = serde_json::from_str::<OpenAiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(LlmError::Api(format!("{}: {}", status, msg)));
    }

    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| LlmError::Parse(format!("Failed to parse OpenAI response: {}", e)))?;

    let text = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::Parse("Empty choices array".into()))?;

    metrics::counter!("llm.api.total_tokens", "provider" => "openai")
        .increment(body.usage.total_tokens);

    Ok(ChatCompletion {
        text,
        tokens_used: body.usage.total_tokens,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
