//! Test utilities: mock implementations of the provider and fetcher traits.
//!
//! Handwritten mocks for dependency injection in unit tests. Scripted
//! results live in `Arc<Mutex<Vec<_>>>` queues; every call is recorded so
//! tests can assert on call counts and the models/URLs used.

use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::error::ScrapeError;
use crate::traits::{
    Completion, CompletionProvider, CompletionRequest, Fetcher, FinishReason, Preprocessor,
};

/// A clean-stop completion with one prompt and one completion token.
pub fn completion(content: &str) -> Completion {
    completion_with_usage(content, 1, 1)
}

/// A clean-stop completion with explicit usage numbers.
pub fn completion_with_usage(content: &str, prompt_tokens: u64, completion_tokens: u64) -> Completion {
    Completion {
        content: content.to_string(),
        finish_reason: FinishReason::Stop,
        prompt_tokens,
        completion_tokens,
        raw: json!({
            "id": "cmpl-mock",
            "choices": [{"finish_reason": "stop", "message": {"content": content}}],
            "usage": {
                "prompt_tokens": prompt_tokens,
                "completion_tokens": completion_tokens,
            },
        }),
    }
}

/// A completion terminated by the given non-stop finish reason.
pub fn stopped(content: &str, finish_reason: &str) -> Completion {
    Completion {
        finish_reason: FinishReason::parse(finish_reason),
        ..completion(content)
    }
}

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// Mock completion provider driven by a scripted result queue.
///
/// Each call pops the next scripted result; an exhausted script returns a
/// default completion. Requests are recorded for assertions.
#[derive(Clone, Default)]
pub struct MockProvider {
    script: Arc<Mutex<Vec<Result<Completion, ScrapeError>>>>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockProvider {
    pub fn with_script(script: Vec<Result<Completion, ScrapeError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Model identifier of each recorded call, in call order.
    pub fn models_called(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.model.clone())
            .collect()
    }

    /// All recorded requests, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl CompletionProvider for MockProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ScrapeError> {
        self.calls.lock().unwrap().push(request.clone());
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(completion("Hello world"))
        } else {
            script.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher returning scripted page bodies and recording URLs.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<Vec<Result<String, ScrapeError>>>>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_pages(vec![Ok(html.to_string())])
    }

    pub fn with_error(error: ScrapeError) -> Self {
        Self::with_pages(vec![Err(error)])
    }

    pub fn with_pages(pages: Vec<Result<String, ScrapeError>>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(pages)),
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn urls_fetched(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        self.requested.lock().unwrap().push(url.to_string());
        let mut pages = self.pages.lock().unwrap();
        if pages.is_empty() {
            Ok("<html><body>default</body></html>".to_string())
        } else {
            pages.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// Preprocessor stubs
// ---------------------------------------------------------------------------

/// Splits each fragment on a delimiter — a stand-in for node selection.
pub struct SplitOn(pub char);

impl Preprocessor for SplitOn {
    fn name(&self) -> &str {
        "SplitOn"
    }

    fn apply(&self, fragment: &str) -> Result<Vec<String>, ScrapeError> {
        Ok(fragment
            .split(self.0)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect())
    }
}

/// A preprocessor that discards everything, for exercising the
/// empty-pipeline configuration error.
pub struct DropAll;

impl Preprocessor for DropAll {
    fn name(&self) -> &str {
        "DropAll"
    }

    fn apply(&self, _fragment: &str) -> Result<Vec<String>, ScrapeError> {
        Ok(Vec::new())
    }
}
