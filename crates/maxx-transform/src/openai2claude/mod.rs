pub mod request;
pub mod response;
pub mod stream;

pub use request::chat_request_to_claude;
pub use response::claude_response_to_chat;
pub use stream::ClaudeToChatStreamState;

pub(crate) fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "refusal" => "content_filter",
        _ => "stop",
    }
}
