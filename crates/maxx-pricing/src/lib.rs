//! Pricing engine: (model id, token metrics, multiplier) → integer cost
//! in nanoUSD.
//!
//! All arithmetic multiplies in `i128` before dividing, so roll-ups over
//! millions of attempts stay exact; floats never enter the path.

mod builtin;

pub use builtin::builtin_table;

use maxx_common::TokenMetrics;
use tracing::warn;

/// microUSD per 1M tokens, per dimension. `price_id` 0 marks a built-in
/// fallback row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRecord {
    pub price_id: i64,
    pub model_id: String,
    pub input_price_micro: i64,
    pub output_price_micro: i64,
    /// Zero means "derive from the input price defaults".
    pub cache_read_price_micro: i64,
    pub cache_5m_write_price_micro: i64,
    pub cache_1h_write_price_micro: i64,
    pub has_1m_context: bool,
    pub premium_threshold: i64,
    pub input_premium_num: i64,
    pub input_premium_denom: i64,
    pub output_premium_num: i64,
    pub output_premium_denom: i64,
}

pub const DEFAULT_PREMIUM_THRESHOLD: i64 = 200_000;

impl PriceRecord {
    pub fn flat(model_id: &str, input_micro: i64, output_micro: i64) -> Self {
        Self {
            price_id: 0,
            model_id: model_id.to_string(),
            input_price_micro: input_micro,
            output_price_micro: output_micro,
            cache_read_price_micro: 0,
            cache_5m_write_price_micro: 0,
            cache_1h_write_price_micro: 0,
            has_1m_context: false,
            premium_threshold: DEFAULT_PREMIUM_THRESHOLD,
            input_premium_num: 2,
            input_premium_denom: 1,
            output_premium_num: 3,
            output_premium_denom: 2,
        }
    }

    pub fn with_1m_context(mut self) -> Self {
        self.has_1m_context = true;
        self
    }

    fn cache_read_price(&self) -> i64 {
        if self.cache_read_price_micro != 0 {
            self.cache_read_price_micro
        } else {
            self.input_price_micro / 10
        }
    }

    fn cache_5m_write_price(&self) -> i64 {
        if self.cache_5m_write_price_micro != 0 {
            self.cache_5m_write_price_micro
        } else {
            self.input_price_micro * 5 / 4
        }
    }

    fn cache_1h_write_price(&self) -> i64 {
        if self.cache_1h_write_price_micro != 0 {
            self.cache_1h_write_price_micro
        } else {
            self.input_price_micro * 2
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    /// nanoUSD.
    pub cost: i64,
    /// Id of the price row used; 0 for the built-in table (or no match).
    pub price_id: i64,
}

/// `tokens × microUSD-per-1M × 1000 / 10^6`, floor division after the
/// full multiply.
fn dimension_cost(tokens: i64, price_micro: i64) -> i128 {
    tokens as i128 * price_micro as i128 * 1_000 / 1_000_000
}

/// Tiered cost for 1M-context models: tokens up to the threshold at the
/// base rate, the excess at base × num/denom. At exactly the threshold no
/// premium component applies.
pub fn tiered_cost(tokens: i64, price_micro: i64, threshold: i64, num: i64, denom: i64) -> i128 {
    if tokens <= threshold {
        return dimension_cost(tokens, price_micro);
    }
    let base = dimension_cost(threshold, price_micro);
    let excess = (tokens - threshold) as i128 * price_micro as i128 * num as i128 * 1_000
        / (1_000_000 * denom as i128);
    base + excess
}

/// Cost of one attempt's token metrics under one price record.
/// `multiplier_bp` is basis points (10000 = 1.00×), applied last.
pub fn calculate_cost(price: &PriceRecord, metrics: &TokenMetrics, multiplier_bp: i64) -> i64 {
    let mut total: i128 = 0;

    if price.has_1m_context {
        total += tiered_cost(
            metrics.input_tokens,
            price.input_price_micro,
            price.premium_threshold,
            price.input_premium_num,
            price.input_premium_denom,
        );
        total += tiered_cost(
            metrics.output_tokens,
            price.output_price_micro,
            price.premium_threshold,
            price.output_premium_num,
            price.output_premium_denom,
        );
    } else {
        total += dimension_cost(metrics.input_tokens, price.input_price_micro);
        total += dimension_cost(metrics.output_tokens, price.output_price_micro);
    }

    total += dimension_cost(metrics.cache_read_tokens, price.cache_read_price());
    total += dimension_cost(metrics.cache_5m_write_tokens, price.cache_5m_write_price());
    total += dimension_cost(metrics.cache_1h_write_tokens, price.cache_1h_write_price());
    // An undifferentiated cache-write total bills at the 5-minute rate.
    total += dimension_cost(metrics.cache_creation_total, price.cache_5m_write_price());

    total = total * multiplier_bp as i128 / 10_000;
    total.clamp(0, i64::MAX as i128) as i64
}

/// Immutable, thread-safe price lookup: exact match, then longest-prefix
/// match, then the built-in table, then zero.
#[derive(Debug, Clone, Default)]
pub struct Pricing {
    records: Vec<PriceRecord>,
}

impl Pricing {
    pub fn new(records: Vec<PriceRecord>) -> Self {
        Self { records }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_table())
    }

    pub fn resolve(&self, model: &str) -> Option<&PriceRecord> {
        if let Some(exact) = self.records.iter().find(|record| record.model_id == model) {
            return Some(exact);
        }
        self.records
            .iter()
            .filter(|record| model.starts_with(record.model_id.as_str()))
            .max_by_key(|record| record.model_id.len())
    }

    /// Resolve against this table, fall back to the built-in table, and
    /// price the metrics. Unknown models cost zero and warn.
    pub fn quote(&self, model: &str, metrics: &TokenMetrics, multiplier_bp: i64) -> Quote {
        if let Some(record) = self.resolve(model) {
            return Quote {
                cost: calculate_cost(record, metrics, multiplier_bp),
                price_id: record.price_id,
            };
        }
        let builtin = builtin_table();
        let fallback = Pricing::new(builtin);
        if let Some(record) = fallback.resolve(model) {
            return Quote {
                cost: calculate_cost(record, metrics, multiplier_bp),
                price_id: 0,
            };
        }
        warn!(model, "no price for model, recording zero cost");
        Quote { cost: 0, price_id: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(input: i64, output: i64) -> TokenMetrics {
        TokenMetrics {
            input_tokens: input,
            output_tokens: output,
            ..Default::default()
        }
    }

    #[test]
    fn one_million_context_premium_splits_at_threshold() {
        let price = PriceRecord::flat("claude-sonnet-4-5", 3_000_000, 15_000_000).with_1m_context();
        let quote = calculate_cost(&price, &metrics(250_000, 10_000), 10_000);
        // input: 200k at base + 50k at 2x; output: 10k at base.
        let expected_input = 200_000i64 * 3_000 + 50_000 * 3_000 * 2;
        let expected_output = 10_000i64 * 15_000;
        assert_eq!(quote, expected_input + expected_output);
    }

    #[test]
    fn exactly_threshold_has_no_premium() {
        let price = PriceRecord::flat("m", 3_000_000, 15_000_000).with_1m_context();
        let at_threshold = tiered_cost(200_000, 3_000_000, 200_000, 2, 1);
        assert_eq!(at_threshold, 200_000i128 * 3_000);
        let _ = price;
    }

    #[test]
    fn pricing_matches_rational_expectation_for_large_counts() {
        // tokens up to 10^12 must not overflow and must floor exactly.
        let tokens: i64 = 1_000_000_000_000;
        let price_micro: i64 = 15_000_000;
        let cost = dimension_cost(tokens, price_micro);
        assert_eq!(cost, tokens as i128 * price_micro as i128 * 1_000 / 1_000_000);
    }

    #[test]
    fn cache_defaults_derive_from_input_price() {
        let price = PriceRecord::flat("m", 3_000_000, 15_000_000);
        assert_eq!(price.cache_read_price(), 300_000);
        assert_eq!(price.cache_5m_write_price(), 3_750_000);
        assert_eq!(price.cache_1h_write_price(), 6_000_000);
    }

    #[test]
    fn total_only_cache_creation_bills_at_5m_rate() {
        let price = PriceRecord::flat("m", 1_000_000, 2_000_000);
        let usage = TokenMetrics {
            cache_creation_total: 1_000_000,
            ..Default::default()
        };
        // 1M tokens at input*5/4 = 1_250_000 microUSD = 1_250_000_000 nano.
        assert_eq!(calculate_cost(&price, &usage, 10_000), 1_250_000_000);
    }

    #[test]
    fn multiplier_applies_last() {
        let price = PriceRecord::flat("m", 1_000_000, 0);
        let base = calculate_cost(&price, &metrics(1_000, 0), 10_000);
        let boosted = calculate_cost(&price, &metrics(1_000, 0), 15_000);
        assert_eq!(boosted, base * 3 / 2);
    }

    #[test]
    fn longest_prefix_wins_over_shorter() {
        let pricing = Pricing::new(vec![
            PriceRecord {
                price_id: 1,
                ..PriceRecord::flat("claude", 1, 1)
            },
            PriceRecord {
                price_id: 2,
                ..PriceRecord::flat("claude-sonnet", 2, 2)
            },
        ]);
        assert_eq!(
            pricing.resolve("claude-sonnet-4-5-20250929").unwrap().price_id,
            2
        );
        assert_eq!(pricing.resolve("claude-opus-4").unwrap().price_id, 1);
    }

    #[test]
    fn unknown_model_is_zero_not_error() {
        let pricing = Pricing::new(vec![]);
        let quote = pricing.quote("totally-unknown-model", &metrics(100, 100), 10_000);
        assert_eq!(quote.cost, 0);
        assert_eq!(quote.price_id, 0);
    }

    #[test]
    fn builtin_fallback_used_when_table_misses() {
        let pricing = Pricing::new(vec![]);
        let quote = pricing.quote("claude-sonnet-4-5", &metrics(1_000, 0), 10_000);
        assert_eq!(quote.price_id, 0);
        assert!(quote.cost > 0);
    }
}
