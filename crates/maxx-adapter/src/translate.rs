//! Streaming and non-streaming response translation from the upstream
//! dialect back to the client dialect, with token-incremental usage
//! parsing along the way.

use bytes::Bytes;

use maxx_common::{ClientType, TokenMetrics};
use maxx_protocol::sse::{JsonArrayStreamParser, SseEvent, SseParser};
use maxx_protocol::{claude, gemini, openai};
use maxx_transform::claude2gemini::GeminiToClaudeStreamState;
use maxx_transform::gemini2claude::ClaudeToGeminiStreamState;
use maxx_transform::openai2claude::ClaudeToChatStreamState;
use maxx_transform::{gemini2claude, openai2claude, usage};

use crate::canonical::Dialect;
use crate::{AdapterError, AdapterResult};

const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Incremental transform `(chunk, state) → out-chunks`; the executor owns
/// the read loop and the cancellation check.
pub struct ResponseTranslator {
    inner: Inner,
}

enum Inner {
    ClaudePassthrough {
        parser: SseParser,
        usage: claude::Usage,
        model: Option<String>,
    },
    OpenAIChatPassthrough {
        parser: SseParser,
        usage: openai::ChatUsage,
        model: Option<String>,
    },
    CodexPassthrough {
        parser: SseParser,
        usage: openai::ResponseUsage,
        model: Option<String>,
    },
    GeminiPassthrough {
        parser: JsonArrayStreamParser,
        usage: gemini::UsageMetadata,
        model: Option<String>,
    },
    ClaudeToOpenAI {
        parser: SseParser,
        state: ClaudeToChatStreamState,
        done_sent: bool,
    },
    ClaudeToGemini {
        parser: SseParser,
        state: ClaudeToGeminiStreamState,
        framing: JsonArrayFraming,
    },
    GeminiToClaude {
        parser: JsonArrayStreamParser,
        state: GeminiToClaudeStreamState,
    },
}

impl ResponseTranslator {
    pub fn new(
        upstream: Dialect,
        client: ClientType,
        model: &str,
        created: i64,
    ) -> AdapterResult<Self> {
        let inner = match (upstream, client) {
            (Dialect::Claude, ClientType::Claude) => Inner::ClaudePassthrough {
                parser: SseParser::new(),
                usage: claude::Usage::default(),
                model: None,
            },
            (Dialect::OpenAIChat, ClientType::OpenAI) => Inner::OpenAIChatPassthrough {
                parser: SseParser::new(),
                usage: openai::ChatUsage::default(),
                model: None,
            },
            (Dialect::Codex, ClientType::Codex) => Inner::CodexPassthrough {
                parser: SseParser::new(),
                usage: openai::ResponseUsage::default(),
                model: None,
            },
            (Dialect::Gemini, ClientType::Gemini) => Inner::GeminiPassthrough {
                parser: JsonArrayStreamParser::new(),
                usage: gemini::UsageMetadata::default(),
                model: None,
            },
            (Dialect::Claude, ClientType::OpenAI) => Inner::ClaudeToOpenAI {
                parser: SseParser::new(),
                state: ClaudeToChatStreamState::new(created),
                done_sent: false,
            },
            (Dialect::Claude, ClientType::Gemini) => Inner::ClaudeToGemini {
                parser: SseParser::new(),
                state: ClaudeToGeminiStreamState::new(),
                framing: JsonArrayFraming::default(),
            },
            (Dialect::Gemini, ClientType::Claude) => Inner::GeminiToClaude {
                parser: JsonArrayStreamParser::new(),
                state: GeminiToClaudeStreamState::new(model),
            },
            _ => return Err(AdapterError::Unsupported("stream translation pair")),
        };
        Ok(Self { inner })
    }

    /// Feed one upstream chunk; returns zero or more client-ready chunks.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        match &mut self.inner {
            Inner::ClaudePassthrough { parser, usage, model } => {
                for event in parser.push_bytes(chunk) {
                    track_claude_event(&event, usage, model);
                }
                vec![Bytes::copy_from_slice(chunk)]
            }
            Inner::OpenAIChatPassthrough { parser, usage, model } => {
                for event in parser.push_bytes(chunk) {
                    if event.data == "[DONE]" {
                        continue;
                    }
                    if let Ok(frame) =
                        serde_json::from_str::<openai::ChatCompletionChunk>(&event.data)
                    {
                        if model.is_none() && !frame.model.is_empty() {
                            *model = Some(frame.model.clone());
                        }
                        if let Some(frame_usage) = frame.usage {
                            *usage = frame_usage;
                        }
                    }
                }
                vec![Bytes::copy_from_slice(chunk)]
            }
            Inner::CodexPassthrough { parser, usage, model } => {
                for event in parser.push_bytes(chunk) {
                    if let Ok(frame) =
                        serde_json::from_str::<openai::ResponseStreamFrame>(&event.data)
                        && let Some(response) = frame.response
                    {
                        if model.is_none() && !response.model.is_empty() {
                            *model = Some(response.model.clone());
                        }
                        if let Some(frame_usage) = response.usage {
                            *usage = frame_usage;
                        }
                    }
                }
                vec![Bytes::copy_from_slice(chunk)]
            }
            Inner::GeminiPassthrough { parser, usage, model } => {
                for object in parser.push_bytes(chunk) {
                    if let Ok(frame) =
                        serde_json::from_str::<gemini::GenerateContentResponse>(&object)
                    {
                        if let Some(frame_usage) = frame.usage_metadata {
                            *usage = frame_usage;
                        }
                        if model.is_none() {
                            *model = frame.model_version;
                        }
                    }
                }
                vec![Bytes::copy_from_slice(chunk)]
            }
            Inner::ClaudeToOpenAI { parser, state, done_sent } => {
                let mut out = Vec::new();
                for event in parser.push_bytes(chunk) {
                    let Some(parsed) = parse_claude_event(&event) else {
                        continue;
                    };
                    for chunk in state.push(&parsed) {
                        out.push(encode_data_frame(&chunk));
                    }
                }
                if state.finished() && !*done_sent {
                    *done_sent = true;
                    out.push(Bytes::from_static(DONE_FRAME));
                }
                out
            }
            Inner::ClaudeToGemini { parser, state, framing } => {
                let mut out = Vec::new();
                for event in parser.push_bytes(chunk) {
                    let Some(parsed) = parse_claude_event(&event) else {
                        continue;
                    };
                    for frame in state.push(&parsed) {
                        if let Ok(json) = serde_json::to_string(&frame) {
                            out.push(framing.frame(&json));
                        }
                    }
                }
                out
            }
            Inner::GeminiToClaude { parser, state } => {
                let mut out = Vec::new();
                for object in parser.push_bytes(chunk) {
                    let Ok(frame) = serde_json::from_str::<gemini::GenerateContentResponse>(&object)
                    else {
                        continue;
                    };
                    for event in state.push(&frame) {
                        out.push(encode_claude_event(&event));
                    }
                }
                out
            }
        }
    }

    /// Flush at upstream EOF; emits trailing frames the client dialect
    /// requires.
    pub fn finish(&mut self) -> Vec<Bytes> {
        match &mut self.inner {
            Inner::ClaudePassthrough { parser, usage, model } => {
                for event in parser.finish() {
                    track_claude_event(&event, usage, model);
                }
                Vec::new()
            }
            Inner::OpenAIChatPassthrough { .. }
            | Inner::CodexPassthrough { .. }
            | Inner::GeminiPassthrough { .. } => Vec::new(),
            Inner::ClaudeToOpenAI { done_sent, .. } => {
                if *done_sent {
                    Vec::new()
                } else {
                    *done_sent = true;
                    vec![Bytes::from_static(DONE_FRAME)]
                }
            }
            Inner::ClaudeToGemini { framing, .. } => framing.close().into_iter().collect(),
            Inner::GeminiToClaude { state, .. } => state
                .finish()
                .iter()
                .map(encode_claude_event)
                .collect(),
        }
    }

    /// Token counters accumulated from the stream so far.
    pub fn metrics(&self) -> TokenMetrics {
        match &self.inner {
            Inner::ClaudePassthrough { usage, .. } => usage::from_claude(usage),
            Inner::OpenAIChatPassthrough { usage, .. } => usage::from_openai_chat(usage),
            Inner::CodexPassthrough { usage, .. } => usage::from_openai_responses(usage),
            Inner::GeminiPassthrough { usage, .. } => usage::from_gemini(usage),
            Inner::ClaudeToOpenAI { state, .. } => usage::from_claude(state.usage()),
            Inner::ClaudeToGemini { state, .. } => usage::from_claude(state.usage()),
            Inner::GeminiToClaude { state, .. } => usage::from_claude(state.usage()),
        }
    }

    /// Model the upstream reported mid-stream, if any.
    pub fn response_model(&self) -> Option<String> {
        match &self.inner {
            Inner::ClaudePassthrough { model, .. }
            | Inner::OpenAIChatPassthrough { model, .. }
            | Inner::CodexPassthrough { model, .. }
            | Inner::GeminiPassthrough { model, .. } => model.clone(),
            Inner::ClaudeToOpenAI { state, .. } => state.response_model().map(str::to_string),
            Inner::ClaudeToGemini { state, .. } => state.response_model().map(str::to_string),
            Inner::GeminiToClaude { state, .. } => Some(state.response_model().to_string()),
        }
    }
}

fn track_claude_event(event: &SseEvent, usage: &mut claude::Usage, model: &mut Option<String>) {
    let Some(parsed) = parse_claude_event(event) else {
        return;
    };
    match parsed {
        claude::StreamEvent::MessageStart { message } => {
            *usage = message.usage;
            if model.is_none() {
                *model = Some(message.model);
            }
        }
        claude::StreamEvent::MessageDelta {
            usage: Some(delta), ..
        } => {
            usage.output_tokens = delta.output_tokens;
            if delta.input_tokens > 0 {
                usage.input_tokens = delta.input_tokens;
            }
            if delta.cache_read_input_tokens.is_some() {
                usage.cache_read_input_tokens = delta.cache_read_input_tokens;
            }
            if delta.cache_creation_input_tokens.is_some() {
                usage.cache_creation_input_tokens = delta.cache_creation_input_tokens;
            }
        }
        _ => {}
    }
}

fn parse_claude_event(event: &SseEvent) -> Option<claude::StreamEvent> {
    serde_json::from_str(&event.data).ok()
}

fn encode_data_frame<T: serde::Serialize>(value: &T) -> Bytes {
    let json = serde_json::to_string(value).unwrap_or_default();
    Bytes::from(format!("data: {json}\n\n"))
}

fn encode_claude_event(event: &claude::StreamEvent) -> Bytes {
    let json = serde_json::to_string(event).unwrap_or_default();
    Bytes::from(format!("event: {}\ndata: {json}\n\n", event.event_name()))
}

/// Gemini streams a JSON array of response objects; this frames each
/// object with the surrounding punctuation.
#[derive(Debug, Default)]
struct JsonArrayFraming {
    opened: bool,
    closed: bool,
}

impl JsonArrayFraming {
    fn frame(&mut self, json: &str) -> Bytes {
        if self.opened {
            Bytes::from(format!(",\r\n{json}"))
        } else {
            self.opened = true;
            Bytes::from(format!("[{json}"))
        }
    }

    fn close(&mut self) -> Option<Bytes> {
        if self.closed {
            return None;
        }
        self.closed = true;
        Some(if self.opened {
            Bytes::from_static(b"]")
        } else {
            Bytes::from_static(b"[]")
        })
    }
}

/// Non-streaming translation of a complete upstream body.
pub struct NonStreamOutput {
    pub body: Bytes,
    pub metrics: TokenMetrics,
    pub response_model: Option<String>,
}

pub fn translate_nonstream(
    upstream: Dialect,
    client: ClientType,
    model: &str,
    created: i64,
    body: &[u8],
) -> AdapterResult<NonStreamOutput> {
    match (upstream, client) {
        (Dialect::Claude, ClientType::Claude) => {
            let response: claude::MessageResponse = parse_body(body)?;
            Ok(NonStreamOutput {
                body: Bytes::copy_from_slice(body),
                metrics: usage::from_claude(&response.usage),
                response_model: Some(response.model),
            })
        }
        (Dialect::Claude, ClientType::OpenAI) => {
            let response: claude::MessageResponse = parse_body(body)?;
            let out = openai2claude::claude_response_to_chat(&response, created)?;
            Ok(NonStreamOutput {
                body: to_bytes(&out)?,
                metrics: usage::from_claude(&response.usage),
                response_model: Some(response.model),
            })
        }
        (Dialect::Claude, ClientType::Gemini) => {
            let response: claude::MessageResponse = parse_body(body)?;
            let out = gemini2claude::claude_response_to_gemini(&response)?;
            Ok(NonStreamOutput {
                body: to_bytes(&out)?,
                metrics: usage::from_claude(&response.usage),
                response_model: Some(response.model),
            })
        }
        (Dialect::Gemini, ClientType::Gemini) => {
            let response: gemini::GenerateContentResponse = parse_body(body)?;
            let metrics = response
                .usage_metadata
                .map(|usage| usage::from_gemini(&usage))
                .unwrap_or_default();
            Ok(NonStreamOutput {
                body: Bytes::copy_from_slice(body),
                metrics,
                response_model: response.model_version,
            })
        }
        (Dialect::Gemini, ClientType::Claude) => {
            let response: gemini::GenerateContentResponse = parse_body(body)?;
            let metrics = response
                .usage_metadata
                .map(|usage| usage::from_gemini(&usage))
                .unwrap_or_default();
            let out = maxx_transform::claude2gemini::gemini_response_to_claude(&response, model)?;
            let response_model = Some(out.model.clone());
            Ok(NonStreamOutput {
                body: to_bytes(&out)?,
                metrics,
                response_model,
            })
        }
        (Dialect::Codex, ClientType::Codex) => {
            let response: openai::Response = parse_body(body)?;
            Ok(NonStreamOutput {
                body: Bytes::copy_from_slice(body),
                metrics: response
                    .usage
                    .map(|usage| usage::from_openai_responses(&usage))
                    .unwrap_or_default(),
                response_model: Some(response.model),
            })
        }
        (Dialect::OpenAIChat, ClientType::OpenAI) => {
            let response: openai::ChatCompletionResponse = parse_body(body)?;
            Ok(NonStreamOutput {
                body: Bytes::copy_from_slice(body),
                metrics: response
                    .usage
                    .map(|usage| usage::from_openai_chat(&usage))
                    .unwrap_or_default(),
                response_model: Some(response.model),
            })
        }
        _ => Err(AdapterError::Unsupported("nonstream translation pair")),
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> AdapterResult<T> {
    serde_json::from_slice(body).map_err(|err| AdapterError::Translate(err.to_string()))
}

fn to_bytes<T: serde::Serialize>(value: &T) -> AdapterResult<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| AdapterError::Translate(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claude_stream_bytes() -> Vec<Bytes> {
        let events = [
            claude::StreamEvent::MessageStart {
                message: claude::MessageResponse {
                    id: "msg_1".into(),
                    r#type: "message".into(),
                    role: claude::Role::Assistant,
                    model: "claude-sonnet-4-5".into(),
                    content: vec![],
                    stop_reason: None,
                    stop_sequence: None,
                    usage: claude::Usage {
                        input_tokens: 11,
                        ..Default::default()
                    },
                },
            },
            claude::StreamEvent::ContentBlockDelta {
                index: 0,
                delta: claude::ContentDelta::TextDelta { text: "hi".into() },
            },
            claude::StreamEvent::MessageDelta {
                delta: claude::MessageDeltaBody {
                    stop_reason: Some("end_turn".into()),
                    stop_sequence: None,
                },
                usage: Some(claude::Usage {
                    output_tokens: 6,
                    ..Default::default()
                }),
            },
            claude::StreamEvent::MessageStop,
        ];
        events.iter().map(encode_claude_event).collect()
    }

    #[test]
    fn passthrough_counts_tokens_without_rewriting() {
        let mut translator =
            ResponseTranslator::new(Dialect::Claude, ClientType::Claude, "m", 0).unwrap();
        let mut echoed = Vec::new();
        for chunk in claude_stream_bytes() {
            echoed.extend(translator.push(&chunk));
        }
        translator.finish();
        let metrics = translator.metrics();
        assert_eq!(metrics.input_tokens, 11);
        assert_eq!(metrics.output_tokens, 6);
        assert_eq!(translator.response_model().as_deref(), Some("claude-sonnet-4-5"));
        // Bytes pass through untouched.
        assert_eq!(echoed.len(), claude_stream_bytes().len());
    }

    #[test]
    fn claude_to_openai_emits_done() {
        let mut translator =
            ResponseTranslator::new(Dialect::Claude, ClientType::OpenAI, "m", 0).unwrap();
        let mut out = Vec::new();
        for chunk in claude_stream_bytes() {
            out.extend(translator.push(&chunk));
        }
        out.extend(translator.finish());
        let last = out.last().unwrap();
        assert_eq!(&last[..], DONE_FRAME);
        let joined: Vec<u8> = out.iter().flat_map(|b| b.to_vec()).collect();
        let text = String::from_utf8(joined).unwrap();
        assert!(text.contains("chat.completion.chunk"));
        assert_eq!(translator.metrics().output_tokens, 6);
    }

    #[test]
    fn gemini_to_claude_rewrites_to_sse() {
        let mut translator =
            ResponseTranslator::new(Dialect::Gemini, ClientType::Claude, "gemini-2.5-flash", 0)
                .unwrap();
        let frame = "[{\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"hey\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":2,\"totalTokenCount\":6}}]";
        let mut out = translator.push(frame.as_bytes());
        out.extend(translator.finish());
        let text: String = out
            .iter()
            .map(|b| String::from_utf8_lossy(b).to_string())
            .collect();
        assert!(text.contains("event: message_start"));
        assert!(text.contains("event: message_stop"));
        assert_eq!(translator.metrics().input_tokens, 4);
    }

    #[test]
    fn unsupported_pair_is_rejected() {
        assert!(ResponseTranslator::new(Dialect::Codex, ClientType::Claude, "m", 0).is_err());
    }
}
