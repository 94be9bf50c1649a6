//! Pagination: repeated scrapes following a model-reported next link.

use std::collections::HashSet;

use serde_json::{json, Value};
use url::Url;

use crate::error::ScrapeError;
use crate::request::RetryPolicy;
use crate::response::{Payload, Response};
use crate::schema::SchemaSource;
use crate::scraper::SchemaScraper;
use crate::traits::{CompletionProvider, Fetcher, NullFetcher};

const PAGINATION_INSTRUCTION: &str = "If there is no next page, set next_page to null.";

/// Scrapes a sequence of linked pages into one combined response.
///
/// Wraps the caller's schema under a `results` key next to a `next_page`
/// link field. Pages are fetched strictly in sequence; the loop ends on a
/// null/empty link or when a link repeats (cycle breaker). There is no
/// page cap — the scraper's cost ceiling is the final backstop.
pub struct PaginatedScraper<P: CompletionProvider, F: Fetcher = NullFetcher> {
    scraper: SchemaScraper<P, F>,
    extra_instructions: Vec<String>,
}

impl<P: CompletionProvider> PaginatedScraper<P, NullFetcher> {
    pub fn new(provider: P, schema: impl Into<SchemaSource>) -> Result<Self, ScrapeError> {
        let schema = schema.into();
        let wrapped = json!({
            "results": schema.to_value(),
            "next_page": "url",
        });
        let scraper = SchemaScraper::new(provider, SchemaSource::Object(wrapped))?
            .with_instructions(vec![PAGINATION_INSTRUCTION.to_string()])?;
        Ok(Self {
            scraper,
            extra_instructions: Vec::new(),
        })
    }
}

impl<P: CompletionProvider, F: Fetcher> PaginatedScraper<P, F> {
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.scraper = self.scraper.with_models(models);
        self
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.scraper = self.scraper.with_max_cost(max_cost);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.scraper = self.scraper.with_retry(retry);
        self
    }

    /// Extra instructions, kept after the pagination contract message.
    pub fn with_instructions(mut self, extra: Vec<String>) -> Result<Self, ScrapeError> {
        self.extra_instructions = extra;
        let mut instructions = vec![PAGINATION_INSTRUCTION.to_string()];
        instructions.extend(self.extra_instructions.iter().cloned());
        self.scraper = self.scraper.with_instructions(instructions)?;
        Ok(self)
    }

    pub fn with_fetcher<F2: Fetcher>(self, fetcher: F2) -> PaginatedScraper<P, F2> {
        PaginatedScraper {
            scraper: self.scraper.with_fetcher(fetcher),
            extra_instructions: self.extra_instructions,
        }
    }

    /// Follow `next_page` links from `start_url` until the trail ends.
    pub async fn scrape_all(&self, start_url: &str) -> Result<Response, ScrapeError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut trail: Vec<String> = Vec::new();
        let mut results: Vec<Value> = Vec::new();
        let mut combined = Response::default();
        let mut url = start_url.to_string();

        loop {
            tracing::info!(url = %url, "scraping page");
            let page = self.scraper.scrape(&url).await?;
            seen.insert(url.clone());
            trail.push(url.clone());

            let next = {
                let Payload::Json(value) = &page.data else {
                    return Err(ScrapeError::Postprocessing(
                        "pagination expects parsed JSON pages".into(),
                    ));
                };
                let Some(object) = value.as_object() else {
                    return Err(ScrapeError::Postprocessing(format!(
                        "pagination expects a JSON object per page, got: {value}"
                    )));
                };
                match object.get("results") {
                    Some(Value::Array(items)) => results.extend(items.iter().cloned()),
                    Some(other) => results.push(other.clone()),
                    None => {
                        return Err(ScrapeError::Postprocessing(
                            "page is missing the results key".into(),
                        ));
                    }
                }
                object
                    .get("next_page")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string()
            };
            tracing::debug!(next_page = %next, total = results.len(), "page results");
            combined.absorb_accounting(page);

            if next.is_empty() {
                break;
            }
            let resolved = resolve_link(&url, &next);
            if seen.contains(&resolved) {
                tracing::warn!(url = %resolved, "next page already visited, stopping");
                break;
            }
            url = resolved;
        }

        combined.url = Some(trail.join("; "));
        combined.data = Payload::Json(Value::Array(results));
        Ok(combined)
    }
}

/// Resolve a possibly-relative link against the page it came from.
fn resolve_link(base: &str, link: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(link)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => link.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{completion, MockFetcher, MockProvider};

    fn pages() -> MockFetcher {
        MockFetcher::with_pages(vec![
            Ok("<main><a href=\"/aardvark\">Aardvark</a></main>".into()),
            Ok("<main><a href=\"/iguana\">Iguana</a></main>".into()),
            Ok("<main><a href=\"/tiger\">Tiger</a></main>".into()),
        ])
    }

    #[tokio::test]
    async fn follows_links_until_null() {
        let provider = MockProvider::with_script(vec![
            Ok(completion(
                r#"{"next_page": "/page2", "results": [
                    {"name": "Aardvark", "url": "/aardvark"}, {"name": "Bear", "url": "/bear"},
                    {"name": "Emu", "url": "/emu"}, {"name": "Giraffe", "url": "/giraffe"},
                    {"name": "Hippo", "url": "/hippo"}]}"#,
            )),
            Ok(completion(
                r#"{"next_page": "/page3", "results": [
                    {"name": "Iguana", "url": "/iguana"}, {"name": "Jaguar", "url": "/jaguar"},
                    {"name": "Koala", "url": "/koala"}, {"name": "Lion", "url": "/lion"},
                    {"name": "Narwhal", "url": "/narwhal"}]}"#,
            )),
            Ok(completion(
                r#"{"next_page": null, "results": [
                    {"name": "Tiger", "url": "/tiger"}, {"name": "Vulture", "url": "/vulture"},
                    {"name": "Whale", "url": "/whale"}, {"name": "Yak", "url": "/yak"}]}"#,
            )),
        ]);
        let fetcher = pages();
        let scraper = PaginatedScraper::new(provider.clone(), json!({"name": "str", "url": "url"}))
            .unwrap()
            .with_fetcher(fetcher.clone());

        let response = scraper
            .scrape_all("https://example.com/page1")
            .await
            .unwrap();

        assert_eq!(
            fetcher.urls_fetched(),
            vec![
                "https://example.com/page1",
                "https://example.com/page2",
                "https://example.com/page3",
            ]
        );
        let items = response.data.as_json().unwrap().as_array().unwrap();
        assert_eq!(items.len(), 14);
        assert_eq!(items[0]["name"], "Aardvark");
        assert_eq!(items[13]["name"], "Yak");
        assert_eq!(response.api_responses.len(), 3);
        assert_eq!(response.total_prompt_tokens, 3);
        assert_eq!(response.total_completion_tokens, 3);
        assert_eq!(
            response.url.as_deref(),
            Some(
                "https://example.com/page1; https://example.com/page2; https://example.com/page3"
            )
        );
    }

    #[tokio::test]
    async fn repeated_link_stops_the_loop() {
        let provider = MockProvider::with_script(vec![
            Ok(completion(
                r#"{"next_page": "/page2", "results": [{"name": "a"}]}"#,
            )),
            Ok(completion(
                r#"{"next_page": "/page1", "results": [{"name": "b"}]}"#,
            )),
        ]);
        let scraper = PaginatedScraper::new(provider.clone(), json!({"name": "str"}))
            .unwrap()
            .with_fetcher(pages());

        let response = scraper
            .scrape_all("https://example.com/page1")
            .await
            .unwrap();

        // the /page1 revisit is detected before any third call
        assert_eq!(provider.call_count(), 2);
        let items = response.data.as_json().unwrap().as_array().unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn missing_results_key_is_fatal() {
        let provider =
            MockProvider::with_script(vec![Ok(completion(r#"{"next_page": null}"#))]);
        let scraper = PaginatedScraper::new(provider, json!({"name": "str"}))
            .unwrap()
            .with_fetcher(pages());

        let err = scraper
            .scrape_all("https://example.com/page1")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Postprocessing(_)));
    }

    #[test]
    fn relative_links_resolve_against_the_current_page() {
        assert_eq!(
            resolve_link("https://example.com/list/page1", "/page2"),
            "https://example.com/page2"
        );
        assert_eq!(
            resolve_link("https://example.com/list/page1", "page2"),
            "https://example.com/list/page2"
        );
        // raw-HTML scrapes have no usable base
        assert_eq!(resolve_link("<html>", "/page2"), "/page2");
    }

    #[tokio::test]
    async fn pagination_instruction_is_sent() {
        let provider = MockProvider::with_script(vec![Ok(completion(
            r#"{"next_page": null, "results": []}"#,
        ))]);
        let scraper = PaginatedScraper::new(provider.clone(), json!({"name": "str"}))
            .unwrap()
            .with_fetcher(pages());

        scraper
            .scrape_all("https://example.com/page1")
            .await
            .unwrap();

        let request = &provider.requests()[0];
        assert!(request
            .messages
            .iter()
            .any(|m| m.content.contains("set next_page to null")));
        assert!(request.messages[0].content.contains("\"results\""));
    }
}
