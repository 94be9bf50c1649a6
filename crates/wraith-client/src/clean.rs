//! Cleaning preprocessors: tag stripping and Markdown conversion.

use std::sync::Arc;

use htmd::HtmlToMarkdown;
use scraper::{ElementRef, Html, Node};
use wraith_core::error::ScrapeError;
use wraith_core::traits::Preprocessor;

/// Elements whose subtrees carry no extractable content.
const NOISE_TAGS: &[&str] = &["script", "style", "noscript", "iframe", "svg"];

/// Preprocessor that re-serializes HTML without scripts, styles, and
/// comments. Keeps the markup structure (links included) intact, which
/// downstream selection and pagination rely on.
#[derive(Debug, Default)]
pub struct StripTags;

impl Preprocessor for StripTags {
    fn name(&self) -> &str {
        "StripTags"
    }

    fn apply(&self, fragment: &str) -> Result<Vec<String>, ScrapeError> {
        let doc = Html::parse_document(fragment);
        let mut out = String::with_capacity(fragment.len());
        serialize_element(&doc.root_element(), &mut out);
        Ok(vec![out])
    }
}

fn serialize_element(el: &ElementRef<'_>, out: &mut String) {
    let tag = el.value().name();
    if NOISE_TAGS.contains(&tag) {
        return;
    }

    out.push('<');
    out.push_str(tag);
    for (name, value) in el.value().attrs() {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&value.replace('"', "&quot;"));
        out.push('"');
    }
    out.push('>');

    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    serialize_element(&child_el, out);
                }
            }
            // comments, doctypes, processing instructions all dropped
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

/// Preprocessor that converts HTML to Markdown to cut token usage.
///
/// Collapses boilerplate elements entirely; links survive as Markdown
/// links, so pagination still works. Not suitable ahead of CSS selection,
/// which needs markup.
pub struct Markdownify {
    converter: Arc<HtmlToMarkdown>,
}

impl Markdownify {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
            ])
            .build();
        Self {
            converter: Arc::new(converter),
        }
    }
}

impl Default for Markdownify {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor for Markdownify {
    fn name(&self) -> &str {
        "Markdownify"
    }

    fn apply(&self, fragment: &str) -> Result<Vec<String>, ScrapeError> {
        let markdown = self
            .converter
            .convert(fragment)
            .map_err(|e| ScrapeError::Preprocessor(e.to_string()))?;
        Ok(vec![markdown])
    }
}
