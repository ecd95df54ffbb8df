use crate::PriceRecord;

/// Built-in fallback prices (microUSD per 1M tokens). Used when the
/// price table has no row for a model; always reported as `price_id` 0.
pub fn builtin_table() -> Vec<PriceRecord> {
    vec![
        PriceRecord::flat("claude-sonnet-4-5", 3_000_000, 15_000_000).with_1m_context(),
        PriceRecord::flat("claude-sonnet-4", 3_000_000, 15_000_000).with_1m_context(),
        PriceRecord::flat("claude-3-5-sonnet", 3_000_000, 15_000_000),
        PriceRecord::flat("claude-3-5-haiku", 800_000, 4_000_000),
        PriceRecord::flat("claude-haiku-4-5", 1_000_000, 5_000_000),
        PriceRecord::flat("claude-opus-4", 15_000_000, 75_000_000),
        PriceRecord::flat("gemini-2.5-flash", 300_000, 2_500_000),
        PriceRecord::flat("gemini-2.5-pro", 1_250_000, 10_000_000),
        PriceRecord::flat("gemini-3-pro", 2_000_000, 12_000_000),
        PriceRecord::flat("gpt-4o-mini", 150_000, 600_000),
        PriceRecord::flat("gpt-4o", 2_500_000, 10_000_000),
        PriceRecord::flat("gpt-5-mini", 250_000, 2_000_000),
        PriceRecord::flat("gpt-5", 1_250_000, 10_000_000),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sonnet_carries_1m_context_tier() {
        let table = builtin_table();
        let sonnet = table
            .iter()
            .find(|record| record.model_id == "claude-sonnet-4-5")
            .unwrap();
        assert!(sonnet.has_1m_context);
        assert_eq!(sonnet.premium_threshold, 200_000);
        assert_eq!(sonnet.input_premium_num, 2);
        assert_eq!(sonnet.output_premium_num, 3);
        assert_eq!(sonnet.output_premium_denom, 2);
    }
}
