//! Grouping of HTML fragments into token-bounded chunks.

use crate::tokens::count_tokens;

/// Recombine an ordered fragment list into the fewest contiguous chunks
/// that each fit `max_tokens` under `model`'s encoding.
///
/// Fragments are atomic markup units and are never split: a single
/// fragment larger than the budget becomes its own oversized chunk.
/// Concatenating the returned chunks reproduces the input exactly.
pub fn chunk_fragments(fragments: &[String], max_tokens: usize, model: &str) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut sizes: Vec<usize> = Vec::new();
    let mut chunk = String::new();
    let mut chunk_tokens = 0usize;

    for fragment in fragments {
        let fragment_tokens = count_tokens(model, fragment);
        // close the running chunk first, unless it is empty
        if chunk_tokens + fragment_tokens > max_tokens && chunk_tokens > 0 {
            chunks.push(std::mem::take(&mut chunk));
            sizes.push(chunk_tokens);
            chunk_tokens = 0;
        }
        chunk.push_str(fragment);
        chunk_tokens += fragment_tokens;
    }

    if !chunk.is_empty() {
        sizes.push(chunk_tokens);
        chunks.push(chunk);
    }

    tracing::debug!(num = chunks.len(), sizes = ?sizes, "chunked fragments");
    chunks
}
