use maxx_protocol::claude;
use maxx_protocol::gemini;

use super::response::claude_usage_to_gemini;
use crate::claude2gemini::map_stop_reason;

/// Incremental Claude-event → Gemini-frame transformer.
///
/// Tool-use input arrives as partial JSON deltas on the Claude side; the
/// state buffers each block until its stop event and emits one complete
/// functionCall frame.
#[derive(Debug, Default)]
pub struct ClaudeToGeminiStreamState {
    model: String,
    finished: bool,
    usage: claude::Usage,
    stop_reason: Option<String>,
    // (block index, id, name, buffered json)
    open_tool: Option<(usize, String, String, String)>,
}

impl ClaudeToGeminiStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn usage(&self) -> &claude::Usage {
        &self.usage
    }

    pub fn response_model(&self) -> Option<&str> {
        (!self.model.is_empty()).then_some(self.model.as_str())
    }

    pub fn push(&mut self, event: &claude::StreamEvent) -> Vec<gemini::GenerateContentResponse> {
        match event {
            claude::StreamEvent::MessageStart { message } => {
                self.model = message.model.clone();
                self.usage = message.usage;
                Vec::new()
            }
            claude::StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if let claude::ContentBlock::ToolUse { id, name, .. } = content_block {
                    self.open_tool = Some((*index, id.clone(), name.clone(), String::new()));
                }
                Vec::new()
            }
            claude::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                claude::ContentDelta::TextDelta { text } => {
                    vec![self.text_frame(text.clone(), false)]
                }
                claude::ContentDelta::ThinkingDelta { thinking } => {
                    vec![self.text_frame(thinking.clone(), true)]
                }
                claude::ContentDelta::InputJsonDelta { partial_json } => {
                    if let Some((open_index, _, _, buffer)) = self.open_tool.as_mut()
                        && *open_index == *index
                    {
                        buffer.push_str(partial_json);
                    }
                    Vec::new()
                }
                claude::ContentDelta::SignatureDelta { .. } => Vec::new(),
            },
            claude::StreamEvent::ContentBlockStop { index } => {
                let Some((open_index, id, name, buffer)) = self.open_tool.take() else {
                    return Vec::new();
                };
                if open_index != *index {
                    self.open_tool = Some((open_index, id, name, buffer));
                    return Vec::new();
                }
                let args = serde_json::from_str(&buffer)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                self.stop_reason = Some("tool_use".into());
                vec![self.frame(
                    vec![gemini::Part {
                        function_call: Some(gemini::FunctionCall {
                            name,
                            args,
                            id: Some(id),
                        }),
                        ..Default::default()
                    }],
                    None,
                    false,
                )]
            }
            claude::StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                    if usage.input_tokens > 0 {
                        self.usage.input_tokens = usage.input_tokens;
                    }
                    if usage.cache_read_input_tokens.is_some() {
                        self.usage.cache_read_input_tokens = usage.cache_read_input_tokens;
                    }
                }
                if self.stop_reason.is_none() {
                    self.stop_reason = delta.stop_reason.clone();
                }
                Vec::new()
            }
            claude::StreamEvent::MessageStop => {
                self.finished = true;
                let finish = self
                    .stop_reason
                    .as_deref()
                    .map(map_stop_reason)
                    .unwrap_or("STOP");
                vec![self.frame(Vec::new(), Some(finish.to_string()), true)]
            }
            claude::StreamEvent::Ping | claude::StreamEvent::Error { .. } => Vec::new(),
        }
    }

    fn text_frame(&self, text: String, thought: bool) -> gemini::GenerateContentResponse {
        self.frame(
            vec![gemini::Part {
                text: Some(text),
                thought: thought.then_some(true),
                ..Default::default()
            }],
            None,
            false,
        )
    }

    fn frame(
        &self,
        parts: Vec<gemini::Part>,
        finish_reason: Option<String>,
        with_usage: bool,
    ) -> gemini::GenerateContentResponse {
        gemini::GenerateContentResponse {
            candidates: vec![gemini::Candidate {
                content: (!parts.is_empty()).then_some(gemini::Content {
                    role: Some("model".into()),
                    parts,
                }),
                finish_reason,
                index: Some(0),
            }],
            usage_metadata: with_usage.then(|| claude_usage_to_gemini(&self.usage)),
            model_version: (!self.model.is_empty()).then(|| self.model.clone()),
            response_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_tool_call_emits_once_complete() {
        let mut state = ClaudeToGeminiStreamState::new();
        state.push(&claude::StreamEvent::ContentBlockStart {
            index: 0,
            content_block: claude::ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "calc".into(),
                input: serde_json::json!({}),
            },
        });
        assert!(state
            .push(&claude::StreamEvent::ContentBlockDelta {
                index: 0,
                delta: claude::ContentDelta::InputJsonDelta {
                    partial_json: "{\"n\":".into(),
                },
            })
            .is_empty());
        state.push(&claude::StreamEvent::ContentBlockDelta {
            index: 0,
            delta: claude::ContentDelta::InputJsonDelta {
                partial_json: "42}".into(),
            },
        });
        let frames = state.push(&claude::StreamEvent::ContentBlockStop { index: 0 });
        let call = frames[0].candidates[0].content.as_ref().unwrap().parts[0]
            .function_call
            .as_ref()
            .unwrap();
        assert_eq!(call.args, serde_json::json!({"n": 42}));

        let tail = state.push(&claude::StreamEvent::MessageStop);
        assert_eq!(tail[0].candidates[0].finish_reason.as_deref(), Some("STOP"));
        assert!(state.finished());
    }
}
