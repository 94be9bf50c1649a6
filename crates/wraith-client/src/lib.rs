//! I/O collaborators for wraith: HTTP fetching, HTML preprocessors, and
//! the OpenAI-compatible completion provider.

pub mod clean;
pub mod fetcher;
pub mod openai;
pub mod select;

pub use clean::{Markdownify, StripTags};
pub use fetcher::ReqwestFetcher;
pub use openai::OpenAiProvider;
pub use select::CssSelect;
