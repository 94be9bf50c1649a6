//! Trait seams between the engine and its I/O collaborators.
//!
//! Implementations live in `wraith-client`; the engine and scrapers are
//! generic over these so tests run against in-memory mocks.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// A role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Provider call parameters. Temperature defaults to 0 for determinism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for CallParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: None,
            max_tokens: None,
        }
    }
}

/// One outgoing completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub params: CallParams,
    /// Request the provider's strict-JSON response mode.
    pub json_mode: bool,
}

/// Provider-reported cause of generation termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::ContentFilter => write!(f, "content_filter"),
            FinishReason::Other(s) => write!(f, "{s}"),
        }
    }
}

/// One provider response, reduced to the fields the engine consumes.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub finish_reason: FinishReason,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Full provider payload, kept for the caller's diagnostics.
    pub raw: serde_json::Value,
}

/// Issues completion calls against an LLM provider.
pub trait CompletionProvider: Send + Sync {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<Completion, ScrapeError>> + Send;
}

/// Fetches raw HTML content from a URL.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, ScrapeError>> + Send;
}

/// Default fetcher for scrapers that only ever receive raw HTML.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFetcher;

impl Fetcher for NullFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        Err(ScrapeError::Http(format!(
            "no fetcher configured, cannot fetch {url}"
        )))
    }
}

/// A selection/cleaning stage: maps each fragment to zero-or-more fragments.
///
/// Stages chain left to right; outputs are flattened between stages. A
/// stage that leaves the pipeline empty is a configuration error
/// ([`ScrapeError::Preprocessor`]).
pub trait Preprocessor: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, fragment: &str) -> Result<Vec<String>, ScrapeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_round_trip() {
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::parse("content_filter"),
            FinishReason::ContentFilter
        );
        assert_eq!(
            FinishReason::parse("tool_calls"),
            FinishReason::Other("tool_calls".into())
        );
        assert_eq!(FinishReason::parse("length").to_string(), "length");
    }

    #[test]
    fn default_params_are_deterministic() {
        assert_eq!(CallParams::default().temperature, 0.0);
    }

    #[tokio::test]
    async fn null_fetcher_rejects_urls() {
        let err = NullFetcher.fetch("https://example.com").await.unwrap_err();
        assert!(matches!(err, ScrapeError::Http(_)));
    }
}
