use maxx_protocol::claude;
use maxx_protocol::openai;

use super::map_stop_reason;
use crate::TransformError;

/// Translate a terminal Claude message into an OpenAI Chat Completions
/// response body.
pub fn claude_response_to_chat(
    resp: &claude::MessageResponse,
    created: i64,
) -> Result<openai::ChatCompletionResponse, TransformError> {
    let mut text = String::new();
    let mut tool_calls: Vec<openai::ToolCall> = Vec::new();

    for block in &resp.content {
        match block {
            claude::ContentBlock::Text { text: t, .. } => text.push_str(t),
            claude::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(openai::ToolCall {
                    id: id.clone(),
                    r#type: "function".into(),
                    function: openai::ToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)
                            .map_err(|err| TransformError::InvalidPayload(err.to_string()))?,
                    },
                });
            }
            // Thinking and tool results never appear in assistant output
            // on this path.
            _ => {}
        }
    }

    let message = openai::ChatMessage {
        role: openai::ChatRole::Assistant,
        content: (!text.is_empty()).then_some(openai::ChatContent::Text(text)),
        name: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    };

    let usage = claude_usage_to_chat(&resp.usage);

    Ok(openai::ChatCompletionResponse {
        id: format!("chatcmpl-{}", resp.id),
        object: "chat.completion".into(),
        created,
        model: resp.model.clone(),
        choices: vec![openai::ChatChoice {
            index: 0,
            message,
            finish_reason: resp
                .stop_reason
                .as_deref()
                .map(|reason| map_stop_reason(reason).to_string()),
        }],
        usage: Some(usage),
    })
}

pub(crate) fn claude_usage_to_chat(usage: &claude::Usage) -> openai::ChatUsage {
    let cached = usage.cache_read_input_tokens.unwrap_or(0);
    let prompt = usage.input_tokens + cached;
    openai::ChatUsage {
        prompt_tokens: prompt,
        completion_tokens: usage.output_tokens,
        total_tokens: prompt + usage.output_tokens,
        prompt_tokens_details: (cached > 0)
            .then_some(openai::PromptTokensDetails { cached_tokens: cached }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_tool_use_translate() {
        let resp = claude::MessageResponse {
            id: "msg_01".into(),
            r#type: "message".into(),
            role: claude::Role::Assistant,
            model: "claude-sonnet-4-5".into(),
            content: vec![
                claude::ContentBlock::Text {
                    text: "checking".into(),
                    citations: None,
                },
                claude::ContentBlock::ToolUse {
                    id: "toolu_1".into(),
                    name: "lookup".into(),
                    input: serde_json::json!({"q": 1}),
                },
            ],
            stop_reason: Some("tool_use".into()),
            stop_sequence: None,
            usage: claude::Usage {
                input_tokens: 12,
                output_tokens: 7,
                ..Default::default()
            },
        };
        let out = claude_response_to_chat(&resp, 1_700_000_000).unwrap();
        assert_eq!(out.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        let message = &out.choices[0].message;
        assert_eq!(message.tool_calls.as_ref().unwrap()[0].function.name, "lookup");
        assert_eq!(out.usage.unwrap().total_tokens, 19);
    }
}
