use maxx_protocol::claude;
use maxx_protocol::openai;

use super::map_stop_reason;
use super::response::claude_usage_to_chat;

/// Incremental Claude-stream → OpenAI-chunk transformer.
///
/// One Claude stream event maps to zero or more chat chunks. The caller
/// feeds parsed `StreamEvent`s and writes the returned chunks as
/// `data:` frames, appending `data: [DONE]` when `finished()` flips.
#[derive(Debug)]
pub struct ClaudeToChatStreamState {
    id: String,
    created: i64,
    model: String,
    role_sent: bool,
    finished: bool,
    stop_reason: Option<String>,
    usage: claude::Usage,
    /// claude content-block index → openai tool_call index
    tool_indexes: Vec<(usize, i64)>,
    next_tool_index: i64,
}

impl ClaudeToChatStreamState {
    pub fn new(created: i64) -> Self {
        Self {
            id: String::new(),
            created,
            model: String::new(),
            role_sent: false,
            finished: false,
            stop_reason: None,
            usage: claude::Usage::default(),
            tool_indexes: Vec::new(),
            next_tool_index: 0,
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn usage(&self) -> &claude::Usage {
        &self.usage
    }

    /// Model name the upstream reported in `message_start`, if any.
    pub fn response_model(&self) -> Option<&str> {
        (!self.model.is_empty()).then_some(self.model.as_str())
    }

    pub fn push(&mut self, event: &claude::StreamEvent) -> Vec<openai::ChatCompletionChunk> {
        match event {
            claude::StreamEvent::MessageStart { message } => {
                self.id = format!("chatcmpl-{}", message.id);
                self.model = message.model.clone();
                self.usage = message.usage;
                self.role_sent = true;
                vec![self.chunk(
                    openai::ChatChunkDelta {
                        role: Some(openai::ChatRole::Assistant),
                        content: Some(String::new()),
                        tool_calls: None,
                    },
                    None,
                    None,
                )]
            }
            claude::StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                claude::ContentBlock::ToolUse { id, name, .. } => {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_indexes.push((*index, tool_index));
                    vec![self.tool_chunk(openai::ToolCallChunk {
                        index: tool_index,
                        id: Some(id.clone()),
                        r#type: Some("function".into()),
                        function: Some(openai::ToolCallChunkFunction {
                            name: Some(name.clone()),
                            arguments: Some(String::new()),
                        }),
                    })]
                }
                _ => Vec::new(),
            },
            claude::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                claude::ContentDelta::TextDelta { text } => vec![self.chunk(
                    openai::ChatChunkDelta {
                        role: None,
                        content: Some(text.clone()),
                        tool_calls: None,
                    },
                    None,
                    None,
                )],
                claude::ContentDelta::InputJsonDelta { partial_json } => {
                    let Some(tool_index) = self.tool_index_for(*index) else {
                        return Vec::new();
                    };
                    vec![self.tool_chunk(openai::ToolCallChunk {
                        index: tool_index,
                        id: None,
                        r#type: None,
                        function: Some(openai::ToolCallChunkFunction {
                            name: None,
                            arguments: Some(partial_json.clone()),
                        }),
                    })]
                }
                // No chat-completions rendering for thinking deltas.
                claude::ContentDelta::ThinkingDelta { .. }
                | claude::ContentDelta::SignatureDelta { .. } => Vec::new(),
            },
            claude::StreamEvent::ContentBlockStop { .. } => Vec::new(),
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
                self.stop_reason = delta.stop_reason.clone();
                Vec::new()
            }
            claude::StreamEvent::MessageStop => {
                self.finished = true;
                let finish = self
                    .stop_reason
                    .as_deref()
                    .map(map_stop_reason)
                    .unwrap_or("stop");
                vec![
                    self.chunk(openai::ChatChunkDelta::default(), Some(finish.into()), None),
                    self.usage_chunk(),
                ]
            }
            claude::StreamEvent::Ping | claude::StreamEvent::Error { .. } => Vec::new(),
        }
    }

    fn tool_index_for(&self, block_index: usize) -> Option<i64> {
        self.tool_indexes
            .iter()
            .find(|(block, _)| *block == block_index)
            .map(|(_, tool)| *tool)
    }

    fn tool_chunk(&self, call: openai::ToolCallChunk) -> openai::ChatCompletionChunk {
        self.chunk(
            openai::ChatChunkDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![call]),
            },
            None,
            None,
        )
    }

    fn usage_chunk(&self) -> openai::ChatCompletionChunk {
        let mut chunk = self.chunk(openai::ChatChunkDelta::default(), None, None);
        chunk.choices.clear();
        chunk.usage = Some(claude_usage_to_chat(&self.usage));
        chunk
    }

    fn chunk(
        &self,
        delta: openai::ChatChunkDelta,
        finish_reason: Option<String>,
        usage: Option<openai::ChatUsage>,
    ) -> openai::ChatCompletionChunk {
        openai::ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".into(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![openai::ChatChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_start(model: &str, input_tokens: i64) -> claude::StreamEvent {
        claude::StreamEvent::MessageStart {
            message: claude::MessageResponse {
                id: "msg_01".into(),
                r#type: "message".into(),
                role: claude::Role::Assistant,
                model: model.into(),
                content: vec![],
                stop_reason: None,
                stop_sequence: None,
                usage: claude::Usage {
                    input_tokens,
                    ..Default::default()
                },
            },
        }
    }

    #[test]
    fn full_stream_produces_done_sequence() {
        let mut state = ClaudeToChatStreamState::new(1_700_000_000);

        let chunks = state.push(&message_start("claude-sonnet-4-5", 12));
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].choices[0].delta.role,
            Some(openai::ChatRole::Assistant)
        );

        let chunks = state.push(&claude::StreamEvent::ContentBlockDelta {
            index: 0,
            delta: claude::ContentDelta::TextDelta { text: "hel".into() },
        });
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("hel"));

        state.push(&claude::StreamEvent::MessageDelta {
            delta: claude::MessageDeltaBody {
                stop_reason: Some("end_turn".into()),
                stop_sequence: None,
            },
            usage: Some(claude::Usage {
                output_tokens: 4,
                ..Default::default()
            }),
        });

        let chunks = state.push(&claude::StreamEvent::MessageStop);
        assert!(state.finished());
        assert_eq!(chunks[0].choices[0].finish_reason.as_deref(), Some("stop"));
        let usage = chunks[1].usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(state.response_model(), Some("claude-sonnet-4-5"));
    }

    #[test]
    fn tool_use_stream_maps_to_tool_call_chunks() {
        let mut state = ClaudeToChatStreamState::new(0);
        state.push(&message_start("m", 1));

        let chunks = state.push(&claude::StreamEvent::ContentBlockStart {
            index: 1,
            content_block: claude::ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "search".into(),
                input: serde_json::json!({}),
            },
        });
        let calls = chunks[0].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("toolu_1"));

        let chunks = state.push(&claude::StreamEvent::ContentBlockDelta {
            index: 1,
            delta: claude::ContentDelta::InputJsonDelta {
                partial_json: "{\"q\":".into(),
            },
        });
        let calls = chunks[0].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(
            calls[0].function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"q\":")
        );
    }
}
