use serde_json::{json, Value};

use crate::proxy::mappers::common::{map_finish_reason_claude, ParsedParts};
use crate::proxy::signature_cache::SignatureCache;

/// Assembles a non-stream Messages body from parsed upstream parts.
/// Block order mirrors the stream writer: thinking, tool_use, text.
pub fn build_claude_response(parsed: &ParsedParts, model: &str) -> Value {
    let pass_signature = SignatureCache::global().pass_signature_to_client();
    let mut content: Vec<Value> = Vec::new();

    if !parsed.reasoning.is_empty() {
        let mut block = json!({
            "type": "thinking",
            "thinking": parsed.reasoning,
        });
        if pass_signature {
            if let Some(sig) = &parsed.reasoning_signature {
                block["signature"] = json!(sig);
            }
        }
        content.push(block);
    }

    for call in &parsed.tool_calls {
        let mut block = json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.args,
        });
        if pass_signature {
            if let Some(sig) = &call.signature {
                block["signature"] = json!(sig);
            }
        }
        content.push(block);
    }

    if !parsed.content.is_empty() {
        content.push(json!({ "type": "text", "text": parsed.content }));
    }

    let stop_reason = map_finish_reason_claude(
        parsed.finish_reason.as_deref().unwrap_or("STOP"),
        !parsed.tool_calls.is_empty(),
    );

    json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
        "usage": parsed.usage.as_ref().map(|u| json!({
            "input_tokens": u.prompt_tokens,
            "output_tokens": u.completion_tokens,
        })),
    })
}
