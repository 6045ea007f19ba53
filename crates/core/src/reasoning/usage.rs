//! Token cost accounting.

use crate::metrics;
use crate::registry::ApiUsageRecord;

use super::CompletionResponse;

/// Price per million tokens (input, output) in USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

/// Known model prices, matched by longest prefix.
const PRICE_TABLE: &[(&str, ModelPrice)] = &[
    ("gpt-4o-mini", ModelPrice { input: 0.15, output: 0.60 }),
    ("gpt-4o", ModelPrice { input: 2.50, output: 10.00 }),
    ("gpt-4-turbo", ModelPrice { input: 10.00, output: 30.00 }),
    ("gpt-4.1-mini", ModelPrice { input: 0.40, output: 1.60 }),
    ("gpt-4.1", ModelPrice { input: 2.00, output: 8.00 }),
    ("claude-3-haiku", ModelPrice { input: 0.25, output: 1.25 }),
    ("claude-3-5-haiku", ModelPrice { input: 0.80, output: 4.00 }),
    ("claude-haiku", ModelPrice { input: 1.00, output: 5.00 }),
    ("claude-3-5-sonnet", ModelPrice { input: 3.00, output: 15.00 }),
    ("claude-3-7-sonnet", ModelPrice { input: 3.00, output: 15.00 }),
    ("claude-sonnet", ModelPrice { input: 3.00, output: 15.00 }),
    ("claude-opus", ModelPrice { input: 15.00, output: 75.00 }),
];

/// Unknown hosted models are charged like gpt-4o.
const FALLBACK_PRICE: ModelPrice = ModelPrice {
    input: 2.50,
    output: 10.00,
};

pub fn price_for(provider: &str, model: &str) -> ModelPrice {
    if provider == "ollama" {
        return ModelPrice {
            input: 0.0,
            output: 0.0,
        };
    }
    PRICE_TABLE
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, price)| *price)
        .unwrap_or(FALLBACK_PRICE)
}

/// Cost of one call in USD, rounded to micro-dollars.
pub fn cost_usd(provider: &str, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let price = price_for(provider, model);
    let cost = input_tokens as f64 / 1_000_000.0 * price.input
        + output_tokens as f64 / 1_000_000.0 * price.output;
    (cost * 1_000_000.0).round() / 1_000_000.0
}

/// Usage collected over one stage, persisted by the orchestrator afterwards.
#[derive(Debug, Clone, Default)]
pub struct UsageTally {
    item_id: Option<String>,
    records: Vec<ApiUsageRecord>,
}

impl UsageTally {
    pub fn new(item_id: Option<String>) -> Self {
        Self {
            item_id,
            records: Vec::new(),
        }
    }

    pub fn for_item(item_id: impl Into<String>) -> Self {
        Self::new(Some(item_id.into()))
    }

    pub fn record(&mut self, provider: &str, purpose: &str, response: &CompletionResponse) {
        let usage = response.usage;
        let cost = cost_usd(provider, &response.model, usage.input_tokens, usage.output_tokens);

        metrics::REASONING_TOKENS
            .with_label_values(&[purpose, "input"])
            .inc_by(usage.input_tokens as u64);
        metrics::REASONING_TOKENS
            .with_label_values(&[purpose, "output"])
            .inc_by(usage.output_tokens as u64);
        metrics::REASONING_COST.with_label_values(&[purpose]).inc_by(cost);

        tracing::debug!(
            provider,
            model = %response.model,
            purpose,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_usd = cost,
            "Reasoning call"
        );

        self.records.push(ApiUsageRecord {
            item_id: self.item_id.clone(),
            purpose: purpose.to_string(),
            provider: provider.to_string(),
            model: response.model.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: cost,
        });
    }

    pub fn records(&self) -> &[ApiUsageRecord] {
        &self.records
    }

    pub fn take_records(&mut self) -> Vec<ApiUsageRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn total_cost(&self) -> f64 {
        self.records.iter().map(|r| r.cost_usd).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.records
            .iter()
            .map(|r| r.input_tokens as u64 + r.output_tokens as u64)
            .sum()
    }

    pub fn calls(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::TokenUsage;

    #[test]
    fn test_prefix_matching_prefers_longest() {
        assert_eq!(price_for("openai", "gpt-4o-mini-2024-07-18").input, 0.15);
        assert_eq!(price_for("openai", "gpt-4o-2024-08-06").input, 2.50);
        assert_eq!(price_for("anthropic", "claude-3-5-haiku-20241022").input, 0.80);
        assert_eq!(price_for("openai", "mystery-model"), FALLBACK_PRICE);
        assert_eq!(price_for("ollama", "llama3").output, 0.0);
    }

    #[test]
    fn test_cost_calculation() {
        // 1000 in / 500 out on gpt-4o-mini: 0.00015 + 0.0003
        let cost = cost_usd("openai", "gpt-4o-mini", 1000, 500);
        assert!((cost - 0.00045).abs() < 1e-9);
    }

    #[test]
    fn test_tally_accumulates() {
        let mut tally = UsageTally::for_item("item-1");
        let response = CompletionResponse {
            text: "ok".to_string(),
            usage: TokenUsage {
                input_tokens: 1_000_000,
                output_tokens: 0,
            },
            model: "gpt-4o".to_string(),
        };
        tally.record("openai", "outline", &response);
        tally.record("openai", "section", &response);

        assert_eq!(tally.calls(), 2);
        assert_eq!(tally.total_tokens(), 2_000_000);
        assert!((tally.total_cost() - 5.0).abs() < 1e-9);
        assert_eq!(tally.records()[0].item_id.as_deref(), Some("item-1"));

        let records = tally.take_records();
        assert_eq!(records.len(), 2);
        assert_eq!(tally.calls(), 0);
    }
}
