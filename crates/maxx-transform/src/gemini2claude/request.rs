use maxx_protocol::claude;
use maxx_protocol::gemini;

use crate::{DEFAULT_MAX_TOKENS, TransformError};

/// Translate a Gemini generateContent body into a Claude Messages
/// request. `model` and `stream` come from the URL on the Gemini side.
pub fn gemini_request_to_claude(
    req: &gemini::GenerateContentRequest,
    model: &str,
    stream: bool,
) -> Result<claude::CreateMessageRequest, TransformError> {
    let mut messages: Vec<claude::Message> = Vec::new();

    for content in &req.contents {
        let role = match content.role.as_deref() {
            Some("model") => claude::Role::Assistant,
            _ => claude::Role::User,
        };
        let mut blocks: Vec<claude::ContentBlock> = Vec::new();
        for part in &content.parts {
            if let Some(text) = &part.text {
                if part.thought.unwrap_or(false) {
                    blocks.push(claude::ContentBlock::Thinking {
                        thinking: text.clone(),
                        signature: None,
                    });
                } else {
                    blocks.push(claude::ContentBlock::Text {
                        text: text.clone(),
                        citations: None,
                    });
                }
            }
            if let Some(call) = &part.function_call {
                blocks.push(claude::ContentBlock::ToolUse {
                    id: call.id.clone().unwrap_or_else(|| format!("toolu_{}", call.name)),
                    name: call.name.clone(),
                    input: call.args.clone(),
                });
            }
            if let Some(resp) = &part.function_response {
                blocks.push(claude::ContentBlock::ToolResult {
                    tool_use_id: resp.id.clone().unwrap_or_else(|| format!("toolu_{}", resp.name)),
                    content: Some(resp.response.clone()),
                    is_error: None,
                });
            }
        }
        if blocks.is_empty() {
            continue;
        }
        messages.push(claude::Message {
            role,
            content: claude::MessageContent::Blocks(blocks),
        });
    }

    if messages.is_empty() {
        return Err(TransformError::InvalidPayload("empty contents".into()));
    }

    let system = req.system_instruction.as_ref().map(|instruction| {
        claude::SystemPrompt::Text(
            instruction
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    });

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .flat_map(|tool| tool.function_declarations.iter().flatten())
            .map(|decl| claude::Tool {
                name: decl.name.clone(),
                description: decl.description.clone(),
                input_schema: decl.parameters.clone(),
                extra: Default::default(),
            })
            .collect()
    });

    let config = req.generation_config.clone().unwrap_or_default();

    Ok(claude::CreateMessageRequest {
        model: model.to_string(),
        messages,
        max_tokens: config.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        stream: stream.then_some(true),
        temperature: config.temperature,
        top_p: config.top_p,
        top_k: config.top_k,
        stop_sequences: config.stop_sequences,
        tools,
        tool_choice: None,
        metadata: None,
        thinking: None,
        extra: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claude2gemini::claude_request_to_gemini;

    #[test]
    fn claude_gemini_claude_round_trip_preserves_core_fields() {
        let original = claude::CreateMessageRequest {
            model: "claude-sonnet-4-5".into(),
            messages: vec![
                claude::Message {
                    role: claude::Role::User,
                    content: claude::MessageContent::Blocks(vec![claude::ContentBlock::Text {
                        text: "hello".into(),
                        citations: None,
                    }]),
                },
                claude::Message {
                    role: claude::Role::Assistant,
                    content: claude::MessageContent::Blocks(vec![claude::ContentBlock::Text {
                        text: "hi there".into(),
                        citations: None,
                    }]),
                },
            ],
            max_tokens: 512,
            system: Some(claude::SystemPrompt::Text("stay brief".into())),
            stream: Some(true),
            temperature: Some(0.7),
            top_p: Some(0.9),
            top_k: Some(40),
            stop_sequences: Some(vec!["END".into()]),
            tools: None,
            tool_choice: None,
            metadata: None,
            thinking: None,
            extra: Default::default(),
        };

        let gemini_body = claude_request_to_gemini(&original).unwrap();
        let back = gemini_request_to_claude(&gemini_body, "claude-sonnet-4-5", true).unwrap();

        assert_eq!(back.model, original.model);
        assert_eq!(back.messages, original.messages);
        assert_eq!(back.max_tokens, original.max_tokens);
        assert_eq!(back.system, original.system);
        assert_eq!(back.temperature, original.temperature);
        assert_eq!(back.top_p, original.top_p);
        assert_eq!(back.top_k, original.top_k);
        assert_eq!(back.stop_sequences, original.stop_sequences);
    }
}
