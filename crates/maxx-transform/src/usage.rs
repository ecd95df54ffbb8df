//! Usage-shape normalization: every dialect reports token counts
//! differently; the accounting layer wants one `TokenMetrics`.

use maxx_common::TokenMetrics;
use maxx_protocol::{claude, gemini, openai};

pub fn from_claude(usage: &claude::Usage) -> TokenMetrics {
    let mut metrics = TokenMetrics {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
        ..Default::default()
    };
    match usage.cache_creation {
        Some(breakdown) => {
            metrics.cache_5m_write_tokens = breakdown.ephemeral_5m_input_tokens;
            metrics.cache_1h_write_tokens = breakdown.ephemeral_1h_input_tokens;
        }
        None => {
            metrics.cache_creation_total = usage.cache_creation_input_tokens.unwrap_or(0);
        }
    }
    metrics
}

pub fn from_openai_chat(usage: &openai::ChatUsage) -> TokenMetrics {
    let cached = usage
        .prompt_tokens_details
        .map(|details| details.cached_tokens)
        .unwrap_or(0);
    TokenMetrics {
        // prompt_tokens includes the cached portion; accounting keys the
        // two dimensions separately.
        input_tokens: usage.prompt_tokens - cached,
        output_tokens: usage.completion_tokens,
        cache_read_tokens: cached,
        ..Default::default()
    }
}

pub fn from_openai_responses(usage: &openai::ResponseUsage) -> TokenMetrics {
    let cached = usage
        .input_tokens_details
        .map(|details| details.cached_tokens)
        .unwrap_or(0);
    TokenMetrics {
        input_tokens: usage.input_tokens - cached,
        output_tokens: usage.output_tokens,
        cache_read_tokens: cached,
        ..Default::default()
    }
}

pub fn from_gemini(usage: &gemini::UsageMetadata) -> TokenMetrics {
    let cached = usage.cached_content_token_count.unwrap_or(0);
    TokenMetrics {
        input_tokens: usage.prompt_token_count - cached,
        output_tokens: usage.candidates_token_count + usage.thoughts_token_count.unwrap_or(0),
        cache_read_tokens: cached,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_total_only_cache_creation() {
        let usage = claude::Usage {
            input_tokens: 100,
            output_tokens: 10,
            cache_creation_input_tokens: Some(40),
            ..Default::default()
        };
        let metrics = from_claude(&usage);
        assert_eq!(metrics.cache_creation_total, 40);
        assert_eq!(metrics.cache_5m_write_tokens, 0);
    }

    #[test]
    fn openai_cached_split_out_of_prompt() {
        let usage = openai::ChatUsage {
            prompt_tokens: 120,
            completion_tokens: 8,
            total_tokens: 128,
            prompt_tokens_details: Some(openai::PromptTokensDetails { cached_tokens: 100 }),
        };
        let metrics = from_openai_chat(&usage);
        assert_eq!(metrics.input_tokens, 20);
        assert_eq!(metrics.cache_read_tokens, 100);
    }

    #[test]
    fn gemini_thoughts_count_as_output() {
        let usage = gemini::UsageMetadata {
            prompt_token_count: 50,
            candidates_token_count: 10,
            total_token_count: 75,
            cached_content_token_count: None,
            thoughts_token_count: Some(15),
        };
        assert_eq!(from_gemini(&usage).output_tokens, 25);
    }
}
