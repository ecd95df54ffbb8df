use maxx_protocol::claude;
use maxx_protocol::gemini;

use crate::TransformError;
use crate::claude2gemini::map_stop_reason;

/// Translate a terminal Claude message into a Gemini generateContent
/// response body.
pub fn claude_response_to_gemini(
    resp: &claude::MessageResponse,
) -> Result<gemini::GenerateContentResponse, TransformError> {
    let mut parts: Vec<gemini::Part> = Vec::new();
    for block in &resp.content {
        match block {
            claude::ContentBlock::Text { text, .. } => parts.push(gemini::Part {
                text: Some(text.clone()),
                ..Default::default()
            }),
            claude::ContentBlock::Thinking { thinking, .. } => parts.push(gemini::Part {
                text: Some(thinking.clone()),
                thought: Some(true),
                ..Default::default()
            }),
            claude::ContentBlock::ToolUse { id, name, input } => parts.push(gemini::Part {
                function_call: Some(gemini::FunctionCall {
                    name: name.clone(),
                    args: input.clone(),
                    id: Some(id.clone()),
                }),
                ..Default::default()
            }),
            _ => {}
        }
    }

    Ok(gemini::GenerateContentResponse {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content {
                role: Some("model".into()),
                parts,
            }),
            finish_reason: resp
                .stop_reason
                .as_deref()
                .map(|reason| map_stop_reason(reason).to_string()),
            index: Some(0),
        }],
        usage_metadata: Some(claude_usage_to_gemini(&resp.usage)),
        model_version: Some(resp.model.clone()),
        response_id: Some(resp.id.clone()),
    })
}

pub(crate) fn claude_usage_to_gemini(usage: &claude::Usage) -> gemini::UsageMetadata {
    let cached = usage.cache_read_input_tokens.unwrap_or(0);
    let prompt = usage.input_tokens + cached;
    gemini::UsageMetadata {
        prompt_token_count: prompt,
        candidates_token_count: usage.output_tokens,
        total_token_count: prompt + usage.output_tokens,
        cached_content_token_count: (cached > 0).then_some(cached),
        thoughts_token_count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_maps_to_finish_reason() {
        let resp = claude::MessageResponse {
            id: "msg_1".into(),
            r#type: "message".into(),
            role: claude::Role::Assistant,
            model: "claude-sonnet-4-5".into(),
            content: vec![claude::ContentBlock::Text {
                text: "done".into(),
                citations: None,
            }],
            stop_reason: Some("max_tokens".into()),
            stop_sequence: None,
            usage: claude::Usage {
                input_tokens: 3,
                output_tokens: 2,
                ..Default::default()
            },
        };
        let out = claude_response_to_gemini(&resp).unwrap();
        assert_eq!(out.candidates[0].finish_reason.as_deref(), Some("MAX_TOKENS"));
        assert_eq!(out.usage_metadata.unwrap().total_token_count, 5);
    }
}
