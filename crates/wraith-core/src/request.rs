//! The request engine: one completion call per chunk, with retries,
//! model fallback, and cumulative cost accounting.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::ScrapeError;
use crate::models::{self, ModelSpec};
use crate::response::{Payload, Response};
use crate::tokens::count_tokens;
use crate::traits::{ChatMessage, CallParams, CompletionProvider, CompletionRequest};

/// Retry behavior for transient provider failures.
///
/// `max_retries` bounds extra attempts beyond the first; `retry_wait` is
/// slept before re-asking the same model. Which errors count as transient
/// is decided by [`ScrapeError::is_transient`], not by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_wait: Duration) -> Self {
        Self {
            max_retries,
            retry_wait,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_wait: Duration::from_secs(30),
        }
    }
}

/// Lifetime usage totals of one engine instance. Never auto-reset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Issues completion calls for chunks of HTML, enforcing the cost
/// ceiling, per-model token budgets, and the retry/fallback policy.
///
/// The API is sequential by design: a scrape awaits one call at a time,
/// and the pre-flight ceiling check is read-then-act. Totals sit behind
/// a mutex only to allow `&self` accounting; issuing concurrent scrapes
/// through one engine is not supported usage.
pub struct RequestEngine<P: CompletionProvider> {
    provider: P,
    models: Vec<String>,
    params: CallParams,
    max_cost: f64,
    retry: RetryPolicy,
    instructions: Vec<String>,
    totals: Mutex<UsageTotals>,
}

impl<P: CompletionProvider> RequestEngine<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            models: vec!["gpt-3.5-turbo".to_string(), "gpt-4".to_string()],
            params: CallParams::default(),
            max_cost: 1.0,
            retry: RetryPolicy::default(),
            instructions: Vec::new(),
            totals: Mutex::new(UsageTotals::default()),
        }
    }

    /// Ordered candidate models; fallback order is list order.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_params(mut self, params: CallParams) -> Self {
        self.params = params;
        self
    }

    /// Hard ceiling on lifetime spend, in dollars.
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = max_cost;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn set_instructions(&mut self, instructions: Vec<String>) {
        self.instructions = instructions;
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub(crate) fn first_model(&self) -> Result<&'static ModelSpec, ScrapeError> {
        let name = self
            .models
            .first()
            .ok_or_else(|| ScrapeError::UnknownModel("no models configured".to_string()))?;
        models::lookup(name)
    }

    /// Snapshot of lifetime usage totals.
    pub fn stats(&self) -> UsageTotals {
        *self.lock_totals()
    }

    fn lock_totals(&self) -> MutexGuard<'_, UsageTotals> {
        self.totals.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("recovered from poisoned totals mutex");
            poisoned.into_inner()
        })
    }

    /// Run one chunk through the retry/fallback state machine.
    ///
    /// Transient provider errors wait `retry_wait` and re-ask the same
    /// model; token-budget and bad-stop failures advance to the next
    /// candidate immediately. Fallback is strictly left-to-right and
    /// never revisits an exhausted model.
    pub async fn request_chunk(&self, html: &str) -> Result<Response, ScrapeError> {
        if html.is_empty() {
            return Err(ScrapeError::EmptyInput);
        }
        if self.models.is_empty() {
            return Err(ScrapeError::UnknownModel("no models configured".to_string()));
        }

        let mut response = Response::default();
        let mut attempts: u32 = 0;
        let mut model_index = 0usize;

        loop {
            let spec = models::lookup(&self.models[model_index])?;

            match self.attempt(spec, html, &mut attempts, &mut response).await {
                Ok(()) => return Ok(response),
                Err(e) if e.is_retryable() && attempts < self.retry.max_retries + 1 => {
                    tracing::warn!(
                        error = %e,
                        model = spec.name,
                        attempts,
                        "API request failed"
                    );
                    if e.is_transient() {
                        tracing::warn!(
                            wait_secs = self.retry.retry_wait.as_secs(),
                            model = spec.name,
                            "retrying same model"
                        );
                        tokio::time::sleep(self.retry.retry_wait).await;
                    } else if model_index + 1 < self.models.len() {
                        // the input is the problem, not provider health: no wait
                        model_index += 1;
                        tracing::warn!(model = %self.models[model_index], "falling back to next model");
                    } else {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One pass: token pre-check, then the call itself.
    async fn attempt(
        &self,
        spec: &ModelSpec,
        html: &str,
        attempts: &mut u32,
        response: &mut Response,
    ) -> Result<(), ScrapeError> {
        let tokens = count_tokens(spec.name, html);
        // checked before the attempt counts, so budget fallback costs
        // neither an attempt nor network I/O
        if tokens > spec.max_tokens as usize {
            return Err(ScrapeError::TooManyTokens {
                model: spec.name.to_string(),
                tokens,
                max_tokens: spec.max_tokens,
            });
        }

        *attempts += 1;
        tracing::info!(model = spec.name, html_tokens = tokens, "API request");

        let mut messages: Vec<ChatMessage> = self
            .instructions
            .iter()
            .map(ChatMessage::system)
            .collect();
        messages.push(ChatMessage::user(html));

        self.raw_request(spec, messages, response).await
    }

    /// Issue a single completion call and fold its usage into both the
    /// per-request response and the lifetime totals.
    ///
    /// Accounting is additive and unconditional: it is applied before the
    /// finish-reason check because the spend has already occurred.
    pub(crate) async fn raw_request(
        &self,
        spec: &ModelSpec,
        messages: Vec<ChatMessage>,
        response: &mut Response,
    ) -> Result<(), ScrapeError> {
        // pre-flight ceiling check: never start a call once over budget
        let current = self.lock_totals().cost;
        if current > self.max_cost {
            return Err(ScrapeError::MaxCostExceeded {
                cost: current,
                max_cost: self.max_cost,
            });
        }

        let request = CompletionRequest {
            model: spec.name.to_string(),
            messages,
            params: self.params.clone(),
            json_mode: spec.json_mode,
        };

        let start = Instant::now();
        let completion = self.provider.complete(&request).await?;
        let elapsed = start.elapsed();

        let cost = spec.cost(completion.prompt_tokens, completion.completion_tokens);
        tracing::info!(
            duration_ms = elapsed.as_millis() as u64,
            prompt_tokens = completion.prompt_tokens,
            completion_tokens = completion.completion_tokens,
            finish_reason = %completion.finish_reason,
            cost,
            "API response"
        );

        response.api_responses.push(completion.raw);
        response.total_prompt_tokens += completion.prompt_tokens;
        response.total_completion_tokens += completion.completion_tokens;
        response.total_cost += cost;
        response.api_time += elapsed;
        {
            let mut totals = self.lock_totals();
            totals.prompt_tokens += completion.prompt_tokens;
            totals.completion_tokens += completion.completion_tokens;
            totals.cost += cost;
        }

        if completion.finish_reason != crate::traits::FinishReason::Stop {
            return Err(ScrapeError::BadStop {
                reason: completion.finish_reason.to_string(),
                prompt_tokens: completion.prompt_tokens,
                completion_tokens: completion.completion_tokens,
            });
        }

        response.data = Payload::Text(completion.content);
        Ok(())
    }
}
