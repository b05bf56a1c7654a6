//! Token accounting for persisted content.
//!
//! The stored `token_count` is an estimate used for budgeting context
//! windows; it does not need to match any model's tokenizer exactly.

use std::sync::Arc;

use crate::config::TokensConfig;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Produces an integer cost estimate for a piece of text.
pub trait TokenAccountant: Send + Sync {
    fn count(&self, text: &str) -> i64;
}

/// Returns the same count for every input.
pub struct FixedTokenAccountant(pub i64);

impl TokenAccountant for FixedTokenAccountant {
    fn count(&self, _text: &str) -> i64 {
        self.0
    }
}

/// Estimates tokens as characters / 4, rounded up.
pub struct EstimateTokenAccountant;

impl TokenAccountant for EstimateTokenAccountant {
    fn count(&self, text: &str) -> i64 {
        let chars = text.chars().count();
        chars.div_ceil(CHARS_PER_TOKEN) as i64
    }
}

pub fn create_accountant(config: &TokensConfig) -> Arc<dyn TokenAccountant> {
    match config.accounting.as_str() {
        "fixed" => Arc::new(FixedTokenAccountant(config.fixed_count)),
        _ => Arc::new(EstimateTokenAccountant),
    }
}
