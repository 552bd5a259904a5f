//! Token cost calculation.
//!
//! Prices are a fixed table shipped with the crate, expressed per 1,000 tokens. Model
//! names reported by providers often carry a dated suffix (`gpt-4o-mini-2024-07-18`), so
//! lookup matches table keys as prefixes and the longest matching key wins. That keeps
//! `gpt-4` from shadowing `gpt-4o` or `gpt-4.1`.

use crate::models::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

/// Price of one model family, per 1,000 tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPricing {
    pub const fn per_1k(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.input_per_1k
            + (completion_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// Table of model-family prices keyed by lower-case name prefix
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    entries: BTreeMap<String, ModelPricing>,
}

impl PriceTable {
    /// Build a table from `(key, pricing)` pairs. Keys are lower-cased.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, ModelPricing)>,
        K: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(key, pricing)| (key.into().to_lowercase(), pricing))
                .collect(),
        }
    }

    /// The table shipped with the crate
    pub fn builtin() -> &'static PriceTable {
        &PRICE_TABLE
    }

    fn with_builtin_prices() -> Self {
        Self::from_entries([
            // OpenAI
            ("gpt-3.5-turbo", ModelPricing::per_1k(0.0005, 0.0015)),
            ("gpt-4", ModelPricing::per_1k(0.03, 0.06)),
            ("gpt-4-turbo", ModelPricing::per_1k(0.01, 0.03)),
            ("gpt-4o", ModelPricing::per_1k(0.0025, 0.01)),
            ("gpt-4o-mini", ModelPricing::per_1k(0.00015, 0.0006)),
            ("gpt-4.1", ModelPricing::per_1k(0.002, 0.008)),
            ("gpt-4.1-mini", ModelPricing::per_1k(0.0004, 0.0016)),
            ("gpt-4.1-nano", ModelPricing::per_1k(0.0001, 0.0004)),
            ("o1", ModelPricing::per_1k(0.015, 0.06)),
            ("o1-mini", ModelPricing::per_1k(0.0011, 0.0044)),
            ("o3", ModelPricing::per_1k(0.002, 0.008)),
            ("o3-mini", ModelPricing::per_1k(0.0011, 0.0044)),
            ("o4-mini", ModelPricing::per_1k(0.0011, 0.0044)),
            // Anthropic
            ("claude-3-opus", ModelPricing::per_1k(0.015, 0.075)),
            ("claude-3-sonnet", ModelPricing::per_1k(0.003, 0.015)),
            ("claude-3-haiku", ModelPricing::per_1k(0.00025, 0.00125)),
            ("claude-3-5-sonnet", ModelPricing::per_1k(0.003, 0.015)),
            ("claude-3-5-haiku", ModelPricing::per_1k(0.0008, 0.004)),
            ("claude-3-7-sonnet", ModelPricing::per_1k(0.003, 0.015)),
            ("claude-sonnet-4", ModelPricing::per_1k(0.003, 0.015)),
            ("claude-opus-4", ModelPricing::per_1k(0.015, 0.075)),
        ])
    }

    /// Find the pricing entry for a model name using longest-prefix matching.
    ///
    /// Returns the matched key alongside its pricing.
    pub fn resolve(&self, model_name: &str) -> Option<(&str, &ModelPricing)> {
        let normalized = model_name.trim().to_lowercase();

        self.entries
            .iter()
            .filter(|(key, _)| normalized.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(key, pricing)| (key.as_str(), pricing))
    }

    /// Cost of a call, or `None` when the counts are incomplete or the model is unknown
    pub fn calculate_cost(&self, token_usage: &TokenUsage, model_name: &str) -> Option<f64> {
        let (prompt_tokens, completion_tokens) =
            match (token_usage.prompt_tokens, token_usage.completion_tokens) {
                (Some(prompt), Some(completion)) if prompt > 0 && completion > 0 => {
                    (prompt, completion)
                }
                _ => {
                    debug!(
                        model = model_name,
                        prompt_tokens = ?token_usage.prompt_tokens,
                        completion_tokens = ?token_usage.completion_tokens,
                        "Incomplete token counts, cost not calculated"
                    );
                    return None;
                }
            };

        match self.resolve(model_name) {
            Some((key, pricing)) => {
                let cost = pricing.cost(prompt_tokens, completion_tokens);
                debug!(model = model_name, price_key = key, cost, "Calculated call cost");
                Some(cost)
            }
            None => {
                debug!(model = model_name, "No pricing entry for model, cost not calculated");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Global price table instance
pub static PRICE_TABLE: LazyLock<PriceTable> = LazyLock::new(PriceTable::with_builtin_prices);

/// Get the global price table
pub fn get_price_table() -> &'static PriceTable {
    &PRICE_TABLE
}

/// Calculate the cost of a call against the built-in price table
pub fn calculate_cost(token_usage: &TokenUsage, model_name: &str) -> Option<f64> {
    PRICE_TABLE.calculate_cost(token_usage, model_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: Option<u64>, completion: Option<u64>) -> TokenUsage {
        TokenUsage::new(prompt, completion, None)
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = PriceTable::from_entries([
            ("gpt-4", ModelPricing::per_1k(0.03, 0.06)),
            ("gpt-4o", ModelPricing::per_1k(0.005, 0.015)),
            ("gpt-4o-mini", ModelPricing::per_1k(0.00015, 0.0006)),
        ]);

        let (key, _) = table.resolve("gpt-4o-mini-2025-04-14").unwrap();
        assert_eq!(key, "gpt-4o-mini");

        let (key, _) = table.resolve("gpt-4o-2024-08-06").unwrap();
        assert_eq!(key, "gpt-4o");

        let (key, _) = table.resolve("gpt-4-0613").unwrap();
        assert_eq!(key, "gpt-4");
    }

    #[test]
    fn test_builtin_distinguishes_gpt_4_1() {
        let (key, _) = PriceTable::builtin().resolve("gpt-4.1-mini-2025-04-14").unwrap();
        assert_eq!(key, "gpt-4.1-mini");

        let (key, _) = PriceTable::builtin().resolve("GPT-4.1").unwrap();
        assert_eq!(key, "gpt-4.1");
    }

    #[test]
    fn test_unknown_model() {
        assert!(get_price_table().resolve("llama3.2").is_none());
        assert_eq!(calculate_cost(&usage(Some(10), Some(5)), "llama3.2"), None);
    }

    #[test]
    fn test_cost_formula() {
        let pricing = PriceTable::builtin().resolve("gpt-4o-mini").unwrap().1;
        let expected = (10.0 / 1000.0) * pricing.input_per_1k + (5.0 / 1000.0) * pricing.output_per_1k;

        let cost = calculate_cost(&usage(Some(10), Some(5)), "gpt-4o-mini").unwrap();
        assert_eq!(cost, expected);
    }

    #[test]
    fn test_missing_or_zero_counts_are_absent() {
        assert_eq!(calculate_cost(&usage(None, Some(5)), "gpt-4o"), None);
        assert_eq!(calculate_cost(&usage(Some(10), None), "gpt-4o"), None);
        assert_eq!(calculate_cost(&usage(Some(0), Some(5)), "gpt-4o"), None);
        assert_eq!(calculate_cost(&usage(Some(10), Some(0)), "gpt-4o"), None);
    }

    #[test]
    fn test_custom_table_is_case_insensitive() {
        let table = PriceTable::from_entries([("My-Model", ModelPricing::per_1k(1.0, 2.0))]);
        let cost = table.calculate_cost(&usage(Some(1000), Some(500)), "my-model-v2").unwrap();
        assert_eq!(cost, 2.0);
        assert_eq!(table.len(), 1);
        assert!(!table.is_empty());
    }
}
