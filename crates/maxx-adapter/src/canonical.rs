use maxx_common::ClientType;
use maxx_protocol::{claude, gemini, openai};

/// Wire dialect of an upstream response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Claude,
    OpenAIChat,
    Codex,
    Gemini,
}

/// Normalized in-memory request the router works with, independent of
/// client or provider dialect. `model` holds the *mapped* model once
/// mapping rules have been applied; the payload body is kept in sync.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub client_type: ClientType,
    pub model: String,
    pub stream: bool,
    pub session_id: Option<String>,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub enum Payload {
    ClaudeMessages(claude::CreateMessageRequest),
    ClaudeCountTokens(claude::CountTokensRequest),
    OpenAIChat(openai::ChatCompletionRequest),
    Codex(openai::CreateResponseRequest),
    GeminiGenerate(gemini::GenerateContentRequest),
}

impl CanonicalRequest {
    pub fn from_claude(req: claude::CreateMessageRequest, session_id: Option<String>) -> Self {
        Self {
            client_type: ClientType::Claude,
            model: req.model.clone(),
            stream: req.is_stream(),
            session_id,
            payload: Payload::ClaudeMessages(req),
        }
    }

    pub fn from_claude_count_tokens(
        req: claude::CountTokensRequest,
        session_id: Option<String>,
    ) -> Self {
        Self {
            client_type: ClientType::Claude,
            model: req.model.clone(),
            stream: false,
            session_id,
            payload: Payload::ClaudeCountTokens(req),
        }
    }

    pub fn from_openai_chat(req: openai::ChatCompletionRequest, session_id: Option<String>) -> Self {
        Self {
            client_type: ClientType::OpenAI,
            model: req.model.clone(),
            stream: req.is_stream(),
            session_id,
            payload: Payload::OpenAIChat(req),
        }
    }

    pub fn from_codex(req: openai::CreateResponseRequest, session_id: Option<String>) -> Self {
        Self {
            client_type: ClientType::Codex,
            model: req.model.clone(),
            stream: req.is_stream(),
            session_id,
            payload: Payload::Codex(req),
        }
    }

    pub fn from_gemini(
        req: gemini::GenerateContentRequest,
        model: &str,
        stream: bool,
        session_id: Option<String>,
    ) -> Self {
        Self {
            client_type: ClientType::Gemini,
            model: model.to_string(),
            stream,
            session_id,
            payload: Payload::GeminiGenerate(req),
        }
    }

    /// Model name as presented by the client, before mapping.
    pub fn request_model(&self) -> &str {
        &self.model
    }

    /// Rewrite the effective model after mapping resolution. Dialect
    /// bodies that carry the model inline are kept consistent.
    pub fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
        match &mut self.payload {
            Payload::ClaudeMessages(req) => req.model = model.to_string(),
            Payload::ClaudeCountTokens(req) => req.model = model.to_string(),
            Payload::OpenAIChat(req) => req.model = model.to_string(),
            Payload::Codex(req) => req.model = model.to_string(),
            // Gemini carries the model in the URL, not the body.
            Payload::GeminiGenerate(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_model_keeps_payload_in_sync() {
        let req: claude::CreateMessageRequest = serde_json::from_value(serde_json::json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .unwrap();
        let mut canonical = CanonicalRequest::from_claude(req, None);
        assert!(canonical.stream);

        canonical.set_model("claude-sonnet-4-5");
        assert_eq!(canonical.model, "claude-sonnet-4-5");
        match &canonical.payload {
            Payload::ClaudeMessages(req) => assert_eq!(req.model, "claude-sonnet-4-5"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
