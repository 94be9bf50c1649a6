//! Schema-guided LLM extraction: chunking, retry/fallback, response
//! combination, JSON repair, and cost accounting.
//!
//! The engine and scrapers are generic over the [`traits::CompletionProvider`]
//! and [`traits::Fetcher`] seams; production implementations live in
//! `wraith-client`.

pub mod chunk;
pub mod error;
pub mod models;
pub mod paginate;
pub mod postprocess;
pub mod request;
pub mod response;
pub mod schema;
pub mod scraper;
pub mod testutil;
pub mod tokens;
pub mod traits;

pub use error::ScrapeError;
pub use models::{lookup, ModelSpec, MODELS};
pub use paginate::PaginatedScraper;
pub use request::{RequestEngine, RetryPolicy, UsageTotals};
pub use response::{combine_responses, Payload, Response};
pub use schema::SchemaSource;
pub use scraper::SchemaScraper;
pub use tokens::count_tokens;
pub use traits::{
    CallParams, ChatMessage, Completion, CompletionProvider, CompletionRequest, Fetcher,
    FinishReason, NullFetcher, Preprocessor, Role,
};
