//! Claude client ↔ Gemini upstream: request goes claude→gemini, response
//! and stream come back gemini→claude.

pub mod request;
pub mod response;
pub mod stream;

pub use request::claude_request_to_gemini;
pub use response::gemini_response_to_claude;
pub use stream::GeminiToClaudeStreamState;

pub(crate) fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "STOP" => "end_turn",
        "MAX_TOKENS" => "max_tokens",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => "refusal",
        _ => "end_turn",
    }
}

pub(crate) fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "end_turn" | "stop_sequence" | "tool_use" => "STOP",
        "max_tokens" => "MAX_TOKENS",
        "refusal" => "SAFETY",
        _ => "STOP",
    }
}
