use maxx_protocol::claude;
use maxx_protocol::gemini;

use super::map_finish_reason;
use super::response::gemini_usage_to_claude;

/// Incremental Gemini-frame → Claude-event transformer.
///
/// Gemini streams whole parts per frame; Claude wants explicit block
/// start/delta/stop envelopes, so this state opens and closes text blocks
/// around consecutive text frames and emits complete tool_use blocks per
/// functionCall part.
#[derive(Debug)]
pub struct GeminiToClaudeStreamState {
    model: String,
    started: bool,
    finished: bool,
    text_block_open: bool,
    next_block_index: usize,
    stop_reason: Option<String>,
    usage: claude::Usage,
    tool_counter: usize,
}

impl GeminiToClaudeStreamState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            started: false,
            finished: false,
            text_block_open: false,
            next_block_index: 0,
            stop_reason: None,
            usage: claude::Usage::default(),
            tool_counter: 0,
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn usage(&self) -> &claude::Usage {
        &self.usage
    }

    pub fn response_model(&self) -> &str {
        &self.model
    }

    pub fn push(&mut self, frame: &gemini::GenerateContentResponse) -> Vec<claude::StreamEvent> {
        let mut out = Vec::new();

        if !self.started {
            self.started = true;
            if let Some(version) = &frame.model_version {
                self.model = version.clone();
            }
            out.push(claude::StreamEvent::MessageStart {
                message: claude::MessageResponse {
                    id: frame
                        .response_id
                        .clone()
                        .map(|id| format!("msg_{id}"))
                        .unwrap_or_else(|| "msg_stream".to_string()),
                    r#type: "message".into(),
                    role: claude::Role::Assistant,
                    model: self.model.clone(),
                    content: vec![],
                    stop_reason: None,
                    stop_sequence: None,
                    usage: claude::Usage::default(),
                },
            });
        }

        if let Some(candidate) = frame.candidates.first() {
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    if let Some(text) = &part.text {
                        if !self.text_block_open {
                            out.push(claude::StreamEvent::ContentBlockStart {
                                index: self.next_block_index,
                                content_block: if part.thought.unwrap_or(false) {
                                    claude::ContentBlock::Thinking {
                                        thinking: String::new(),
                                        signature: None,
                                    }
                                } else {
                                    claude::ContentBlock::Text {
                                        text: String::new(),
                                        citations: None,
                                    }
                                },
                            });
                            self.text_block_open = true;
                        }
                        let delta = if part.thought.unwrap_or(false) {
                            claude::ContentDelta::ThinkingDelta {
                                thinking: text.clone(),
                            }
                        } else {
                            claude::ContentDelta::TextDelta { text: text.clone() }
                        };
                        out.push(claude::StreamEvent::ContentBlockDelta {
                            index: self.next_block_index,
                            delta,
                        });
                    }
                    if let Some(call) = &part.function_call {
                        self.close_text_block(&mut out);
                        let index = self.next_block_index;
                        self.next_block_index += 1;
                        self.tool_counter += 1;
                        let id = call
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("toolu_{}_{}", call.name, self.tool_counter));
                        out.push(claude::StreamEvent::ContentBlockStart {
                            index,
                            content_block: claude::ContentBlock::ToolUse {
                                id,
                                name: call.name.clone(),
                                input: serde_json::Value::Object(Default::default()),
                            },
                        });
                        out.push(claude::StreamEvent::ContentBlockDelta {
                            index,
                            delta: claude::ContentDelta::InputJsonDelta {
                                partial_json: call.args.to_string(),
                            },
                        });
                        out.push(claude::StreamEvent::ContentBlockStop { index });
                        self.stop_reason = Some("tool_use".into());
                    }
                }
            }
            if let Some(reason) = &candidate.finish_reason
                && self.stop_reason.is_none()
            {
                self.stop_reason = Some(map_finish_reason(reason).to_string());
            }
        }

        if let Some(usage) = frame.usage_metadata {
            self.usage = gemini_usage_to_claude(usage);
        }

        out
    }

    /// Close out the stream once upstream EOF is observed.
    pub fn finish(&mut self) -> Vec<claude::StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut out = Vec::new();
        self.close_text_block(&mut out);
        out.push(claude::StreamEvent::MessageDelta {
            delta: claude::MessageDeltaBody {
                stop_reason: Some(self.stop_reason.clone().unwrap_or_else(|| "end_turn".into())),
                stop_sequence: None,
            },
            usage: Some(self.usage),
        });
        out.push(claude::StreamEvent::MessageStop);
        out
    }

    fn close_text_block(&mut self, out: &mut Vec<claude::StreamEvent>) {
        if self.text_block_open {
            out.push(claude::StreamEvent::ContentBlockStop {
                index: self.next_block_index,
            });
            self.next_block_index += 1;
            self.text_block_open = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_frame(text: &str) -> gemini::GenerateContentResponse {
        serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        }))
        .unwrap()
    }

    #[test]
    fn text_frames_share_one_block() {
        let mut state = GeminiToClaudeStreamState::new("gemini-2.5-flash");
        let first = state.push(&text_frame("hel"));
        assert!(matches!(first[0], claude::StreamEvent::MessageStart { .. }));
        assert!(matches!(
            first[1],
            claude::StreamEvent::ContentBlockStart { index: 0, .. }
        ));

        let second = state.push(&text_frame("lo"));
        assert_eq!(second.len(), 1);
        assert!(matches!(
            &second[0],
            claude::StreamEvent::ContentBlockDelta { index: 0, .. }
        ));

        let tail = state.finish();
        assert!(matches!(tail[0], claude::StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(tail[2], claude::StreamEvent::MessageStop));
        assert!(state.finished());
    }

    #[test]
    fn final_frame_usage_lands_in_message_delta() {
        let mut state = GeminiToClaudeStreamState::new("m");
        state.push(&text_frame("x"));
        let last: gemini::GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2, "totalTokenCount": 9}
        }))
        .unwrap();
        state.push(&last);
        let tail = state.finish();
        match &tail[1] {
            claude::StreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("end_turn"));
                assert_eq!(usage.unwrap().input_tokens, 7);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
