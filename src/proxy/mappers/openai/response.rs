use chrono::Utc;
use serde_json::{json, Value};

use crate::proxy::mappers::common::{map_finish_reason_openai, ParsedParts};
use crate::proxy::stream::openai::usage_json;
use crate::proxy::stream::UsageEvent;

/// Assembles a non-stream chat completion body from parsed upstream parts.
/// `usage` is null when the upstream omitted usageMetadata; clients must
/// tolerate that.
pub fn build_openai_response(parsed: &ParsedParts, model: &str) -> Value {
    let mut message = json!({
        "role": "assistant",
        "content": parsed.content,
    });
    if !parsed.reasoning.is_empty() {
        message["reasoning_content"] = json!(parsed.reasoning);
    }
    if !parsed.tool_calls.is_empty() {
        let calls: Vec<Value> = parsed
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": serde_json::to_string(&call.args)
                            .unwrap_or_else(|_| "{}".to_string()),
                    }
                })
            })
            .collect();
        message["tool_calls"] = json!(calls);
    }

    let finish_reason = map_finish_reason_openai(
        parsed.finish_reason.as_deref().unwrap_or("STOP"),
        !parsed.tool_calls.is_empty(),
    );

    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
        "usage": parsed.usage.as_ref().map(|u| usage_json(&UsageEvent {
            prompt: u.prompt_tokens,
            completion: u.completion_tokens,
            total: u.total_tokens,
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::mappers::common::{ParsedToolCall, ParsedUsage};

    #[test]
    fn plain_text_response() {
        let parsed = ParsedParts {
            content: "Hello".into(),
            finish_reason: Some("STOP".into()),
            usage: Some(ParsedUsage {
                prompt_tokens: 2,
                completion_tokens: 1,
                total_tokens: 3,
            }),
            ..Default::default()
        };
        let body = build_openai_response(&parsed, "gemini-2.5-pro");
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "Hello");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert_eq!(body["usage"]["total_tokens"], 3);
        assert!(body["choices"][0]["message"].get("tool_calls").is_none());
    }

    #[test]
    fn tool_calls_encode_arguments_as_json_string() {
        let parsed = ParsedParts {
            tool_calls: vec![ParsedToolCall {
                id: "call_1".into(),
                name: "get_weather".into(),
                args: serde_json::json!({"city": "BJ"}),
                signature: None,
            }],
            finish_reason: Some("STOP".into()),
            ..Default::default()
        };
        let body = build_openai_response(&parsed, "m");
        let call = &body["choices"][0]["message"]["tool_calls"][0];
        assert_eq!(call["function"]["arguments"], "{\"city\":\"BJ\"}");
        assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn missing_usage_serializes_as_null() {
        let parsed = ParsedParts {
            content: "x".into(),
            ..Default::default()
        };
        let body = build_openai_response(&parsed, "m");
        assert!(body["usage"].is_null());
    }

    #[test]
    fn reasoning_surfaces_as_reasoning_content() {
        let parsed = ParsedParts {
            content: "answer".into(),
            reasoning: "the plan".into(),
            ..Default::default()
        };
        let body = build_openai_response(&parsed, "m");
        assert_eq!(body["choices"][0]["message"]["reasoning_content"], "the plan");
    }
}
