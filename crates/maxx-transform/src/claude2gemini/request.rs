use std::collections::HashMap;

use maxx_protocol::claude;
use maxx_protocol::gemini;

use crate::TransformError;

/// Translate a Claude Messages request body into Gemini generateContent.
/// The model id travels in the URL on the Gemini side, so it is not part
/// of the returned body.
pub fn claude_request_to_gemini(
    req: &claude::CreateMessageRequest,
) -> Result<gemini::GenerateContentRequest, TransformError> {
    // tool_use id → tool name, needed because functionResponse parts are
    // keyed by name rather than call id.
    let mut tool_names: HashMap<String, String> = HashMap::new();
    let mut contents: Vec<gemini::Content> = Vec::new();

    for message in &req.messages {
        let role = match message.role {
            claude::Role::User => "user",
            claude::Role::Assistant => "model",
        };
        let parts = match &message.content {
            claude::MessageContent::Text(text) => vec![gemini::Part {
                text: Some(text.clone()),
                ..Default::default()
            }],
            claude::MessageContent::Blocks(blocks) => {
                let mut parts = Vec::with_capacity(blocks.len());
                for block in blocks {
                    match block {
                        claude::ContentBlock::Text { text, .. } => parts.push(gemini::Part {
                            text: Some(text.clone()),
                            ..Default::default()
                        }),
                        claude::ContentBlock::Thinking { thinking, .. } => {
                            parts.push(gemini::Part {
                                text: Some(thinking.clone()),
                                thought: Some(true),
                                ..Default::default()
                            })
                        }
                        claude::ContentBlock::ToolUse { id, name, input } => {
                            tool_names.insert(id.clone(), name.clone());
                            parts.push(gemini::Part {
                                function_call: Some(gemini::FunctionCall {
                                    name: name.clone(),
                                    args: input.clone(),
                                    id: Some(id.clone()),
                                }),
                                ..Default::default()
                            })
                        }
                        claude::ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => {
                            let name = tool_names
                                .get(tool_use_id)
                                .cloned()
                                .unwrap_or_else(|| tool_use_id.clone());
                            let response = match content {
                                Some(value) if value.is_object() => value.clone(),
                                Some(value) => serde_json::json!({"result": value}),
                                None => serde_json::json!({}),
                            };
                            parts.push(gemini::Part {
                                function_response: Some(gemini::FunctionResponse {
                                    name,
                                    response,
                                    id: Some(tool_use_id.clone()),
                                }),
                                ..Default::default()
                            })
                        }
                        claude::ContentBlock::Unknown => {}
                    }
                }
                parts
            }
        };
        if parts.is_empty() {
            continue;
        }
        contents.push(gemini::Content {
            role: Some(role.to_string()),
            parts,
        });
    }

    if contents.is_empty() {
        return Err(TransformError::InvalidPayload("empty messages".into()));
    }

    let system_instruction = req.system.as_ref().map(|system| gemini::Content {
        role: None,
        parts: vec![gemini::Part {
            text: Some(system.flatten_text()),
            ..Default::default()
        }],
    });

    let tools = req.tools.as_ref().map(|tools| {
        vec![gemini::GeminiTool {
            function_declarations: Some(
                tools
                    .iter()
                    .map(|tool| gemini::FunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.input_schema.clone(),
                    })
                    .collect(),
            ),
            extra: Default::default(),
        }]
    });

    Ok(gemini::GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(gemini::GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            max_output_tokens: Some(req.max_tokens),
            stop_sequences: req.stop_sequences.clone(),
            thinking_config: None,
        }),
        tools,
        safety_settings: None,
        extra: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_and_system_map() {
        let req = claude::CreateMessageRequest {
            model: "claude-sonnet-4-5".into(),
            messages: vec![
                claude::Message {
                    role: claude::Role::User,
                    content: claude::MessageContent::Text("hi".into()),
                },
                claude::Message {
                    role: claude::Role::Assistant,
                    content: claude::MessageContent::Text("hello".into()),
                },
            ],
            max_tokens: 256,
            system: Some(claude::SystemPrompt::Text("be kind".into())),
            stream: None,
            temperature: Some(0.5),
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            metadata: None,
            thinking: None,
            extra: Default::default(),
        };
        let out = claude_request_to_gemini(&req).unwrap();
        assert_eq!(out.contents[0].role.as_deref(), Some("user"));
        assert_eq!(out.contents[1].role.as_deref(), Some("model"));
        let config = out.generation_config.unwrap();
        assert_eq!(config.max_output_tokens, Some(256));
        assert_eq!(config.temperature, Some(0.5));
        assert_eq!(
            out.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("be kind")
        );
    }

    #[test]
    fn tool_result_resolves_name_from_prior_call() {
        let req = claude::CreateMessageRequest {
            model: "m".into(),
            messages: vec![
                claude::Message {
                    role: claude::Role::Assistant,
                    content: claude::MessageContent::Blocks(vec![claude::ContentBlock::ToolUse {
                        id: "toolu_9".into(),
                        name: "fetch".into(),
                        input: serde_json::json!({"u": 1}),
                    }]),
                },
                claude::Message {
                    role: claude::Role::User,
                    content: claude::MessageContent::Blocks(vec![
                        claude::ContentBlock::ToolResult {
                            tool_use_id: "toolu_9".into(),
                            content: Some(serde_json::json!("ok")),
                            is_error: None,
                        },
                    ]),
                },
            ],
            max_tokens: 16,
            system: None,
            stream: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            metadata: None,
            thinking: None,
            extra: Default::default(),
        };
        let out = claude_request_to_gemini(&req).unwrap();
        let response = out.contents[1].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "fetch");
        assert_eq!(response.response, serde_json::json!({"result": "ok"}));
    }
}
