use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use wraith_core::error::ScrapeError;
use wraith_core::traits::{Completion, CompletionProvider, CompletionRequest, FinishReason};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible completion provider.
///
/// Works against any endpoint speaking the chat-completions protocol,
/// including OpenAI itself and compatibility layers.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl OpenAiProvider {
    pub fn new(api_key: &str) -> Result<Self, ScrapeError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self, ScrapeError> {
        Self::build(api_key, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, ScrapeError> {
        Self::build(&self.api_key, &self.base_url, timeout)
    }

    fn build(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

// ---- wire types ----

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    finish_reason: Option<String>,
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Serialize one completion request to the chat-completions body.
fn build_body(request: &CompletionRequest) -> Result<Value, ScrapeError> {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages,
        "temperature": request.params.temperature,
    });
    if let Some(top_p) = request.params.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(max_tokens) = request.params.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if request.json_mode {
        body["response_format"] = json!({"type": "json_object"});
    }
    Ok(body)
}

/// Reduce a raw provider payload to the fields the engine consumes.
fn parse_payload(raw: Value) -> Result<Completion, ScrapeError> {
    let parsed: ChatResponse = serde_json::from_value(raw.clone())
        .map_err(|e| ScrapeError::Http(format!("failed to parse LLM response: {e}")))?;

    let usage = parsed.usage.ok_or_else(|| ScrapeError::Llm {
        message: "no usage data returned".into(),
        status_code: 200,
        retryable: false,
    })?;

    let choice = parsed.choices.into_iter().next().ok_or_else(|| ScrapeError::Llm {
        message: "empty response from LLM".into(),
        status_code: 200,
        retryable: false,
    })?;

    let content = choice.message.content.ok_or_else(|| ScrapeError::Llm {
        message: "response has no message content".into(),
        status_code: 200,
        retryable: false,
    })?;

    let finish_reason = choice
        .finish_reason
        .map(|r| FinishReason::parse(&r))
        .unwrap_or(FinishReason::Other("unknown".into()));

    Ok(Completion {
        content,
        finish_reason,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        raw,
    })
}

impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ScrapeError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_body(request)?;

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScrapeError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    ScrapeError::Network(format!("connection failed: {e}"))
                } else {
                    ScrapeError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let text = response.text().await.unwrap_or_default();

            if status_code == 429 {
                return Err(ScrapeError::RateLimited);
            }

            let message = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {text}"));

            return Err(ScrapeError::Llm {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ScrapeError::Http(format!("failed to read LLM response: {e}")))?;

        parse_payload(raw)
    }
}
