use maxx_protocol::claude;
use maxx_protocol::gemini;

use super::map_finish_reason;
use crate::TransformError;

/// Translate a terminal Gemini response into a Claude message. `model` is
/// the mapped model the request was served with; Gemini bodies carry only
/// an optional `modelVersion`.
pub fn gemini_response_to_claude(
    resp: &gemini::GenerateContentResponse,
    model: &str,
) -> Result<claude::MessageResponse, TransformError> {
    let candidate = resp
        .candidates
        .first()
        .ok_or_else(|| TransformError::InvalidPayload("no candidates".into()))?;

    let mut content: Vec<claude::ContentBlock> = Vec::new();
    let mut saw_tool_use = false;
    if let Some(body) = &candidate.content {
        for (i, part) in body.parts.iter().enumerate() {
            if let Some(text) = &part.text {
                if part.thought.unwrap_or(false) {
                    content.push(claude::ContentBlock::Thinking {
                        thinking: text.clone(),
                        signature: None,
                    });
                } else {
                    content.push(claude::ContentBlock::Text {
                        text: text.clone(),
                        citations: None,
                    });
                }
            }
            if let Some(call) = &part.function_call {
                saw_tool_use = true;
                content.push(claude::ContentBlock::ToolUse {
                    id: call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("toolu_{}_{i}", call.name)),
                    name: call.name.clone(),
                    input: call.args.clone(),
                });
            }
        }
    }

    let stop_reason = if saw_tool_use {
        Some("tool_use".to_string())
    } else {
        candidate
            .finish_reason
            .as_deref()
            .map(|reason| map_finish_reason(reason).to_string())
    };

    let usage = resp
        .usage_metadata
        .map(gemini_usage_to_claude)
        .unwrap_or_default();

    Ok(claude::MessageResponse {
        id: resp
            .response_id
            .clone()
            .map(|id| format!("msg_{id}"))
            .unwrap_or_else(|| "msg_gemini".to_string()),
        r#type: "message".into(),
        role: claude::Role::Assistant,
        model: resp.model_version.clone().unwrap_or_else(|| model.to_string()),
        content,
        stop_reason,
        stop_sequence: None,
        usage,
    })
}

pub(crate) fn gemini_usage_to_claude(usage: gemini::UsageMetadata) -> claude::Usage {
    let cached = usage.cached_content_token_count.unwrap_or(0);
    claude::Usage {
        input_tokens: usage.prompt_token_count - cached,
        output_tokens: usage.candidates_token_count + usage.thoughts_token_count.unwrap_or(0),
        cache_read_input_tokens: (cached > 0).then_some(cached),
        cache_creation_input_tokens: None,
        cache_creation: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_call_forces_tool_use_stop() {
        let resp: gemini::GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "search", "args": {"q": "x"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 3, "totalTokenCount": 12}
        }))
        .unwrap();
        let out = gemini_response_to_claude(&resp, "gemini-2.5-flash").unwrap();
        assert_eq!(out.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(out.model, "gemini-2.5-flash");
        match &out.content[0] {
            claude::ContentBlock::ToolUse { name, .. } => assert_eq!(name, "search"),
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn empty_candidates_is_invalid() {
        let resp = gemini::GenerateContentResponse::default();
        assert!(gemini_response_to_claude(&resp, "m").is_err());
    }
}
