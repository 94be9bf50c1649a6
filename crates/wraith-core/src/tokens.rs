//! Token counting that matches the target model's encoding.
//!
//! Delegates to `tiktoken-rs`; encoders are expensive to build, so one
//! per encoding family is constructed lazily and shared.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

static CL100K: OnceLock<CoreBPE> = OnceLock::new();
static O200K: OnceLock<CoreBPE> = OnceLock::new();

fn encoder_for(model: &str) -> &'static CoreBPE {
    // gpt-4o family uses the o200k vocabulary, everything else here cl100k.
    if model.starts_with("gpt-4o") {
        O200K.get_or_init(|| tiktoken_rs::o200k_base().expect("bundled o200k vocabulary"))
    } else {
        CL100K.get_or_init(|| tiktoken_rs::cl100k_base().expect("bundled cl100k vocabulary"))
    }
}

/// Number of tokens `text` occupies under `model`'s encoding.
pub fn count_tokens(model: &str, text: &str) -> usize {
    encoder_for(model).encode_with_special_tokens(text).len()
}
