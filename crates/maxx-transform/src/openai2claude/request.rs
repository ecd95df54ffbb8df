use maxx_protocol::claude;
use maxx_protocol::openai;

use crate::{DEFAULT_MAX_TOKENS, TransformError};

/// Translate an OpenAI Chat Completions request into the Claude Messages
/// shape. System/developer messages become the system prompt; tool-role
/// messages fold into user-turn `tool_result` blocks.
pub fn chat_request_to_claude(
    req: &openai::ChatCompletionRequest,
) -> Result<claude::CreateMessageRequest, TransformError> {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<claude::Message> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            openai::ChatRole::System | openai::ChatRole::Developer => {
                if let Some(content) = &msg.content {
                    system_parts.push(content.flatten_text());
                }
            }
            openai::ChatRole::User => {
                let text = msg
                    .content
                    .as_ref()
                    .map(|content| content.flatten_text())
                    .unwrap_or_default();
                push_block(
                    &mut messages,
                    claude::Role::User,
                    claude::ContentBlock::Text {
                        text,
                        citations: None,
                    },
                );
            }
            openai::ChatRole::Assistant => {
                let mut blocks: Vec<claude::ContentBlock> = Vec::new();
                if let Some(content) = &msg.content {
                    let text = content.flatten_text();
                    if !text.is_empty() {
                        blocks.push(claude::ContentBlock::Text {
                            text,
                            citations: None,
                        });
                    }
                }
                for call in msg.tool_calls.iter().flatten() {
                    let input = serde_json::from_str(&call.function.arguments)
                        .unwrap_or(serde_json::Value::Object(Default::default()));
                    blocks.push(claude::ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input,
                    });
                }
                if blocks.is_empty() {
                    continue;
                }
                messages.push(claude::Message {
                    role: claude::Role::Assistant,
                    content: claude::MessageContent::Blocks(blocks),
                });
            }
            openai::ChatRole::Tool => {
                let tool_use_id = msg.tool_call_id.clone().ok_or_else(|| {
                    TransformError::InvalidPayload("tool message without tool_call_id".into())
                })?;
                let content = msg
                    .content
                    .as_ref()
                    .map(|content| serde_json::Value::String(content.flatten_text()));
                push_block(
                    &mut messages,
                    claude::Role::User,
                    claude::ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error: None,
                    },
                );
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(claude::SystemPrompt::Text(system_parts.join("\n\n")))
    };

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| claude::Tool {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: tool.function.parameters.clone(),
                extra: Default::default(),
            })
            .collect()
    });

    Ok(claude::CreateMessageRequest {
        model: req.model.clone(),
        messages,
        max_tokens: req.effective_max_tokens().unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        stream: req.stream,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stop_sequences: req.stop.clone().map(openai::StopSequences::into_vec),
        tools,
        tool_choice: map_tool_choice(req.tool_choice.as_ref()),
        metadata: req.user.clone().map(|user_id| claude::Metadata {
            user_id: Some(user_id),
        }),
        thinking: None,
        extra: Default::default(),
    })
}

/// Consecutive same-role blocks merge into one message; Claude rejects
/// adjacent messages with the same role.
fn push_block(
    messages: &mut Vec<claude::Message>,
    role: claude::Role,
    block: claude::ContentBlock,
) {
    if let Some(last) = messages.last_mut()
        && last.role == role
    {
        match &mut last.content {
            claude::MessageContent::Blocks(blocks) => {
                blocks.push(block);
                return;
            }
            claude::MessageContent::Text(text) => {
                let existing = claude::ContentBlock::Text {
                    text: std::mem::take(text),
                    citations: None,
                };
                last.content = claude::MessageContent::Blocks(vec![existing, block]);
                return;
            }
        }
    }
    messages.push(claude::Message {
        role,
        content: claude::MessageContent::Blocks(vec![block]),
    });
}

fn map_tool_choice(choice: Option<&serde_json::Value>) -> Option<serde_json::Value> {
    let choice = choice?;
    if let Some(name) = choice.as_str() {
        return match name {
            "none" => None,
            "required" => Some(serde_json::json!({"type": "any"})),
            _ => Some(serde_json::json!({"type": "auto"})),
        };
    }
    // {"type":"function","function":{"name":...}} → {"type":"tool","name":...}
    let name = choice
        .get("function")
        .and_then(|f| f.get("name"))
        .and_then(|n| n.as_str())?;
    Some(serde_json::json!({"type": "tool", "name": name}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(messages: Vec<openai::ChatMessage>) -> openai::ChatCompletionRequest {
        serde_json::from_value(serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": []
        }))
        .map(|mut req: openai::ChatCompletionRequest| {
            req.messages = messages;
            req
        })
        .unwrap()
    }

    #[test]
    fn system_messages_become_system_prompt() {
        let req = base_request(vec![
            openai::ChatMessage::text(openai::ChatRole::System, "be terse"),
            openai::ChatMessage::text(openai::ChatRole::User, "hi"),
        ]);
        let out = chat_request_to_claude(&req).unwrap();
        assert_eq!(
            out.system,
            Some(claude::SystemPrompt::Text("be terse".into()))
        );
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_round_folds_into_user_turn() {
        let mut assistant = openai::ChatMessage::text(openai::ChatRole::Assistant, "");
        assistant.content = None;
        assistant.tool_calls = Some(vec![openai::ToolCall {
            id: "call_1".into(),
            r#type: "function".into(),
            function: openai::ToolCallFunction {
                name: "get_weather".into(),
                arguments: "{\"city\":\"SH\"}".into(),
            },
        }]);
        let mut tool = openai::ChatMessage::text(openai::ChatRole::Tool, "sunny");
        tool.tool_call_id = Some("call_1".into());

        let req = base_request(vec![
            openai::ChatMessage::text(openai::ChatRole::User, "weather?"),
            assistant,
            tool,
        ]);
        let out = chat_request_to_claude(&req).unwrap();
        assert_eq!(out.messages.len(), 3);
        match &out.messages[1].content {
            claude::MessageContent::Blocks(blocks) => match &blocks[0] {
                claude::ContentBlock::ToolUse { id, name, .. } => {
                    assert_eq!(id, "call_1");
                    assert_eq!(name, "get_weather");
                }
                other => panic!("unexpected block: {other:?}"),
            },
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn tool_message_without_id_is_invalid() {
        let req = base_request(vec![openai::ChatMessage::text(openai::ChatRole::Tool, "x")]);
        assert!(chat_request_to_claude(&req).is_err());
    }
}
