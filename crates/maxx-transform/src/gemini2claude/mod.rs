//! Gemini client ↔ Claude upstream: request goes gemini→claude, response
//! and stream come back claude→gemini.

pub mod request;
pub mod response;
pub mod stream;

pub use request::gemini_request_to_claude;
pub use response::claude_response_to_gemini;
pub use stream::ClaudeToGeminiStreamState;
