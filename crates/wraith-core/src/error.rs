use thiserror::Error;

/// Application-wide error types for wraith.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    Http(String),

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    Llm {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// Provider rate limit exceeded.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Request timed out.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("network error: {0}")]
    Network(String),

    /// Input exceeds the selected model's token budget.
    #[error("input is {tokens} tokens, max for {model} is {max_tokens}")]
    TooManyTokens {
        model: String,
        tokens: usize,
        max_tokens: u32,
    },

    /// Provider terminated generation abnormally (length cutoff, filter, ...).
    #[error(
        "model did not stop cleanly: {reason} \
         (prompt_tokens={prompt_tokens}, completion_tokens={completion_tokens})"
    )]
    BadStop {
        reason: String,
        prompt_tokens: u64,
        completion_tokens: u64,
    },

    /// Cumulative spend crossed the configured ceiling.
    #[error("total cost {cost:.2} exceeds max cost {max_cost:.2}")]
    MaxCostExceeded { cost: f64, max_cost: f64 },

    /// Model identifier is not in the registry.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Model output did not parse as JSON, even after repair.
    /// Carries the last raw string for diagnostics.
    #[error("invalid JSON from model: {0}")]
    InvalidJson(String),

    /// A preprocessing stage produced no nodes — configuration error.
    #[error("preprocessor error: {0}")]
    Preprocessor(String),

    /// A postprocessing stage rejected already-parsed data.
    #[error("postprocessing error: {0}")]
    Postprocessing(String),

    /// Scrape was invoked with empty input.
    #[error("input HTML cannot be empty")]
    EmptyInput,

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScrapeError {
    /// Transient provider conditions: retried on the same model after a wait.
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::RateLimited | ScrapeError::Timeout(_) | ScrapeError::Network(_) => true,
            ScrapeError::Llm { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Everything the request engine may recover from, including the
    /// token/stop conditions that trigger model fallback instead of a wait.
    pub fn is_retryable(&self) -> bool {
        self.is_transient()
            || matches!(
                self,
                ScrapeError::TooManyTokens { .. } | ScrapeError::BadStop { .. }
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(ScrapeError::RateLimited.is_transient());
        assert!(ScrapeError::Timeout(30).is_transient());
        assert!(ScrapeError::Network("reset".into()).is_transient());
        assert!(
            ScrapeError::Llm {
                message: "server error".into(),
                status_code: 503,
                retryable: true,
            }
            .is_transient()
        );
        assert!(
            !ScrapeError::Llm {
                message: "bad request".into(),
                status_code: 400,
                retryable: false,
            }
            .is_transient()
        );
    }

    #[test]
    fn token_and_stop_errors_are_retryable_but_not_transient() {
        let too_many = ScrapeError::TooManyTokens {
            model: "gpt-4".into(),
            tokens: 10_000,
            max_tokens: 8192,
        };
        let bad_stop = ScrapeError::BadStop {
            reason: "length".into(),
            prompt_tokens: 1,
            completion_tokens: 1,
        };
        assert!(too_many.is_retryable());
        assert!(!too_many.is_transient());
        assert!(bad_stop.is_retryable());
        assert!(!bad_stop.is_transient());
    }

    #[test]
    fn fatal_errors() {
        let cost = ScrapeError::MaxCostExceeded {
            cost: 1.5,
            max_cost: 1.0,
        };
        assert!(!cost.is_retryable());
        assert!(!ScrapeError::InvalidJson("{".into()).is_retryable());
        assert!(!ScrapeError::Preprocessor("no nodes".into()).is_retryable());
    }
}
