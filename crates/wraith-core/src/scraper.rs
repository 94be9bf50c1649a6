//! Schema-guided scraping: instruction assembly, preprocessing, and the
//! split/unsplit request flow.

use std::sync::Arc;

use crate::chunk::chunk_fragments;
use crate::error::ScrapeError;
use crate::postprocess::{JsonPostprocessor, PostContext, PostStage};
use crate::request::{RequestEngine, RetryPolicy, UsageTotals};
use crate::response::{combine_responses, Response};
use crate::schema::SchemaSource;
use crate::traits::{CallParams, CompletionProvider, Fetcher, NullFetcher, Preprocessor};

const FORMAT_INSTRUCTIONS: &str = "Responses should be valid JSON, with no other text. \
     Never truncate the JSON with an ellipsis. \
     Always use double quotes for strings and escape quotes with \\. \
     Always omit trailing commas.";

/// Extracts data matching a declared schema from HTML documents.
///
/// Configuration is assembled once at construction and reused across many
/// `scrape` calls; lifetime usage totals accumulate on the instance and
/// are never reset. The API is sequential — one scrape at a time.
pub struct SchemaScraper<P: CompletionProvider, F: Fetcher = NullFetcher> {
    engine: RequestEngine<P>,
    fetcher: F,
    schema: SchemaSource,
    json_schema: String,
    extra_instructions: Vec<String>,
    preprocessors: Vec<Arc<dyn Preprocessor>>,
    post_stages: Vec<PostStage>,
    custom_post: bool,
    auto_split_length: usize,
}

impl<P: CompletionProvider> SchemaScraper<P, NullFetcher> {
    pub fn new(provider: P, schema: impl Into<SchemaSource>) -> Result<Self, ScrapeError> {
        let schema = schema.into();
        let json_schema = schema.canonical()?;
        let mut scraper = Self {
            engine: RequestEngine::new(provider),
            fetcher: NullFetcher,
            schema,
            json_schema,
            extra_instructions: Vec::new(),
            preprocessors: Vec::new(),
            post_stages: Vec::new(),
            custom_post: false,
            auto_split_length: 0,
        };
        scraper.rebuild_pipeline()?;
        Ok(scraper)
    }
}

impl<P: CompletionProvider, F: Fetcher> SchemaScraper<P, F> {
    /// Ordered candidate models; fallback order is list order.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.engine = self.engine.with_models(models);
        self
    }

    pub fn with_params(mut self, params: CallParams) -> Self {
        self.engine = self.engine.with_params(params);
        self
    }

    /// Hard ceiling on this scraper's lifetime spend, in dollars.
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.engine = self.engine.with_max_cost(max_cost);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.engine = self.engine.with_retry(retry);
        self
    }

    /// Extra natural-language instructions, appended after the schema and
    /// formatting messages.
    pub fn with_instructions(mut self, extra: Vec<String>) -> Result<Self, ScrapeError> {
        self.extra_instructions = extra;
        self.rebuild_pipeline()?;
        Ok(self)
    }

    /// Token threshold above which documents are chunked (0 = no splitting).
    ///
    /// Split mode extracts a list of objects per chunk and disables the
    /// JSON repair nudge, whose single-document contract does not hold
    /// across chunks.
    pub fn with_auto_split(mut self, auto_split_length: usize) -> Result<Self, ScrapeError> {
        self.auto_split_length = auto_split_length;
        self.rebuild_pipeline()?;
        Ok(self)
    }

    /// Append a preprocessing stage. Stages run in insertion order.
    pub fn with_preprocessor(mut self, stage: Arc<dyn Preprocessor>) -> Self {
        self.preprocessors.push(stage);
        self
    }

    /// Replace the default postprocessing stages entirely.
    pub fn with_post_stages(mut self, stages: Vec<PostStage>) -> Self {
        self.post_stages = stages;
        self.custom_post = true;
        self
    }

    pub fn with_fetcher<F2: Fetcher>(self, fetcher: F2) -> SchemaScraper<P, F2> {
        SchemaScraper {
            engine: self.engine,
            fetcher,
            schema: self.schema,
            json_schema: self.json_schema,
            extra_instructions: self.extra_instructions,
            preprocessors: self.preprocessors,
            post_stages: self.post_stages,
            custom_post: self.custom_post,
            auto_split_length: self.auto_split_length,
        }
    }

    /// Lifetime usage totals across all scrapes on this instance.
    pub fn stats(&self) -> UsageTotals {
        self.engine.stats()
    }

    /// The canonical schema string embedded in the instructions.
    pub fn json_schema(&self) -> &str {
        &self.json_schema
    }

    /// Reassemble instructions and default stages after a config change.
    fn rebuild_pipeline(&mut self) -> Result<(), ScrapeError> {
        let json_type = if self.auto_split_length > 0 {
            "list of JSON objects"
        } else {
            "JSON object"
        };
        let mut instructions = vec![
            format!(
                "For the given HTML, convert to a {json_type} matching this schema: {}",
                self.json_schema
            ),
            FORMAT_INSTRUCTIONS.to_string(),
        ];
        instructions.extend(self.extra_instructions.iter().cloned());
        self.engine.set_instructions(instructions);

        if !self.custom_post {
            let mut stages = vec![PostStage::Json(JsonPostprocessor::new(
                self.auto_split_length == 0,
            ))];
            if let Some(validator) = self.schema.validator()? {
                stages.push(PostStage::Validate(validator));
            }
            self.post_stages = stages;
        }
        Ok(())
    }

    /// Scrape a URL or a raw HTML string into the configured schema.
    pub async fn scrape(&self, url_or_html: &str) -> Result<Response, ScrapeError> {
        let (url, html) = if url_or_html.starts_with("http") {
            let body = self.fetcher.fetch(url_or_html).await?;
            (Some(url_or_html.to_string()), body)
        } else {
            (None, url_or_html.to_string())
        };

        let html = collapse_whitespace(&html);
        tracing::debug!(length = html.len(), url = ?url, "got HTML");

        let fragments = self.apply_preprocessors(vec![html])?;

        if self.auto_split_length > 0 {
            let model = self
                .engine
                .models()
                .first()
                .cloned()
                .unwrap_or_default();
            let chunks = chunk_fragments(&fragments, self.auto_split_length, &model);
            let mut responses = Vec::with_capacity(chunks.len());
            // chunks go out strictly one at a time
            for chunk in &chunks {
                let response = self.engine.request_chunk(chunk).await?;
                let response = self.apply_post_stages(response, None).await?;
                responses.push(response);
            }
            Ok(combine_responses(url, responses))
        } else {
            let document = fragments.join("\n");
            let response = self.engine.request_chunk(&document).await?;
            let combined = combine_responses(url, vec![response]);
            // postprocessed after combination so source-aware stages can
            // see the full document
            self.apply_post_stages(combined, Some(&document)).await
        }
    }

    fn apply_preprocessors(&self, seed: Vec<String>) -> Result<Vec<String>, ScrapeError> {
        let mut fragments = seed;
        for stage in &self.preprocessors {
            let mut next = Vec::new();
            for fragment in &fragments {
                next.extend(stage.apply(fragment)?);
            }
            tracing::debug!(
                stage = stage.name(),
                from = fragments.len(),
                to = next.len(),
                "preprocessor"
            );
            if next.is_empty() {
                return Err(ScrapeError::Preprocessor(format!(
                    "{} returned no fragments",
                    stage.name()
                )));
            }
            fragments = next;
        }
        Ok(fragments)
    }

    async fn apply_post_stages(
        &self,
        mut response: Response,
        source: Option<&str>,
    ) -> Result<Response, ScrapeError> {
        let ctx = PostContext {
            engine: &self.engine,
            schema: &self.json_schema,
            source,
        };
        for stage in &self.post_stages {
            tracing::debug!(stage = stage.name(), "postprocessor");
            response = stage.apply(response, &ctx).await?;
        }
        Ok(response)
    }
}

/// Collapse runs of spaces and tabs to a single space, leaving newlines
/// alone. Keeps token counts honest across heavily indented markup.
pub(crate) fn collapse_whitespace(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_run = false;
    for ch in html.chars() {
        if ch == ' ' || ch == '\t' {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            in_run = false;
            out.push(ch);
        }
    }
    out
}
