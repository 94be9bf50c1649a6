use scraper::{Html, Selector};
use wraith_core::error::ScrapeError;
use wraith_core::traits::Preprocessor;

/// Preprocessor that narrows each fragment to the nodes matching a CSS
/// selector, serialized back to HTML in document order.
#[derive(Debug)]
pub struct CssSelect {
    selector: Selector,
    label: String,
}

impl CssSelect {
    pub fn new(css: &str) -> Result<Self, ScrapeError> {
        let selector = Selector::parse(css)
            .map_err(|e| ScrapeError::Preprocessor(format!("invalid CSS selector {css:?}: {e}")))?;
        Ok(Self {
            selector,
            label: format!("CssSelect({css})"),
        })
    }
}

impl Preprocessor for CssSelect {
    fn name(&self) -> &str {
        &self.label
    }

    fn apply(&self, fragment: &str) -> Result<Vec<String>, ScrapeError> {
        let doc = Html::parse_document(fragment);
        Ok(doc.select(&self.selector).map(|el| el.html()).collect())
    }
}
