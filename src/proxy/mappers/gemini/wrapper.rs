use serde_json::{json, Value};

use crate::proxy::mappers::common::{
    build_envelope, fold_standalone_signatures, inject_google_search_tool, resolve_signature,
};
use crate::proxy::mappers::model_features::ModelFeatures;
use crate::proxy::mappers::tools::{clean_parameters, ToolNameRegistry};

/// Gemini `generateContent` bodies are already in the upstream dialect;
/// normalization is limited to signature rebalancing, declaration
/// sanitation and feature-flag tools before wrapping the envelope.
pub fn wrap_gemini_request(
    body: &Value,
    project_id: Option<&str>,
    model: &str,
    features: &ModelFeatures,
) -> Value {
    let mut inner = body.clone();
    if let Some(obj) = inner.as_object_mut() {
        obj.remove("model");
        obj.remove("_isStream");
    }

    if let Some(contents) = inner.get_mut("contents") {
        fold_standalone_signatures(contents);
        inject_missing_call_signatures(contents, model);
    }

    if let Some(tools) = inner.get_mut("tools").and_then(Value::as_array_mut) {
        for tool in tools {
            if let Some(declarations) = tool
                .get_mut("functionDeclarations")
                .and_then(Value::as_array_mut)
            {
                for declaration in declarations.iter_mut() {
                    if let Some(name) = declaration.get("name").and_then(Value::as_str) {
                        let safe = ToolNameRegistry::global().register(model, name);
                        declaration["name"] = json!(safe);
                    }
                    if let Some(params) = declaration.get_mut("parameters") {
                        clean_parameters(params);
                    }
                }
            }
        }
    }

    if let Some(budget) = features.thinking_budget_override {
        let gen_config = inner
            .as_object_mut()
            .map(|obj| obj.entry("generationConfig").or_insert_with(|| json!({})));
        if let Some(config) = gen_config {
            config["thinkingConfig"] = json!({
                "includeThoughts": budget != 0,
                "thinkingBudget": budget,
            });
        }
    }

    if features.web_search {
        inject_google_search_tool(&mut inner);
    }

    build_envelope(model, project_id, inner)
}

/// Prior-turn function calls without a signature would be rejected by the
/// upstream validator; attach the resolved tool-bucket signature.
fn inject_missing_call_signatures(contents: &mut Value, model: &str) {
    let Some(messages) = contents.as_array_mut() else {
        return;
    };
    for message in messages {
        if message.get("role").and_then(Value::as_str) != Some("model") {
            continue;
        }
        let Some(parts) = message.get_mut("parts").and_then(Value::as_array_mut) else {
            continue;
        };
        for part in parts {
            let Some(obj) = part.as_object_mut() else {
                continue;
            };
            if obj.contains_key("functionCall") && !obj.contains_key("thoughtSignature") {
                obj.insert(
                    "thoughtSignature".to_string(),
                    json!(resolve_signature(model, true)),
                );
            }
        }
    }
}

/// Upstream responses nest the real payload under `response`.
pub fn unwrap_gemini_response(response: &Value) -> Value {
    response.get("response").unwrap_or(response).clone()
}

/// Resolve mangled declaration names inside a non-stream response back to
/// the names the client registered.
pub fn restore_tool_names(response: &mut Value, model: &str) {
    let Some(candidates) = response.get_mut("candidates").and_then(Value::as_array_mut) else {
        return;
    };
    for candidate in candidates {
        let Some(parts) = candidate
            .get_mut("content")
            .and_then(|c| c.get_mut("parts"))
            .and_then(Value::as_array_mut)
        else {
            continue;
        };
        for part in parts {
            if let Some(fc) = part.get_mut("functionCall").and_then(Value::as_object_mut) {
                if let Some(name) = fc.get("name").and_then(Value::as_str) {
                    let original = ToolNameRegistry::global().resolve_or_passthrough(model, name);
                    fc.insert("name".to_string(), json!(original));
                }
            }
        }
    }
}

/// Re-assembles a Gemini-dialect non-stream body from parsed parts; used
/// by fake-non-stream mode where the upstream was consumed as SSE.
pub fn build_gemini_response(
    parsed: &crate::proxy::mappers::common::ParsedParts,
    model: &str,
) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    if !parsed.reasoning.is_empty() {
        let mut part = json!({ "text": parsed.reasoning, "thought": true });
        if let Some(sig) = &parsed.reasoning_signature {
            part["thoughtSignature"] = json!(sig);
        }
        parts.push(part);
    }
    if !parsed.content.is_empty() {
        parts.push(json!({ "text": parsed.content }));
    }
    for call in &parsed.tool_calls {
        parts.push(json!({
            "functionCall": { "name": call.name, "args": call.args }
        }));
    }

    let mut body = json!({
        "candidates": [{
            "content": { "role": "model", "parts": parts },
            "finishReason": parsed.finish_reason.clone().unwrap_or_else(|| "STOP".to_string()),
            "index": 0,
        }],
        "modelVersion": model,
    });
    if let Some(usage) = &parsed.usage {
        body["usageMetadata"] = json!({
            "promptTokenCount": usage.prompt_tokens,
            "candidatesTokenCount": usage.completion_tokens,
            "totalTokenCount": usage.total_tokens,
        });
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::signature_cache::SignatureCache;

    #[test]
    fn wrap_carries_project_and_model() {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": "hi" }] }]
        });
        let envelope = wrap_gemini_request(
            &body,
            Some("proj-7"),
            "gemini-2.5-flash",
            &ModelFeatures::default(),
        );
        assert_eq!(envelope["project"], "proj-7");
        assert_eq!(envelope["model"], "gemini-2.5-flash");
        assert_eq!(
            envelope["request"]["contents"][0]["parts"][0]["text"],
            "hi"
        );
    }

    #[test]
    fn missing_function_call_signature_is_injected() {
        let _cache_guard = crate::test_utils::lock_signature_cache();
        SignatureCache::global().clear();
        let body = json!({
            "contents": [{
                "role": "model",
                "parts": [{ "functionCall": { "name": "f", "args": {} } }]
            }]
        });
        let envelope =
            wrap_gemini_request(&body, None, "gemini-2.5-pro", &ModelFeatures::default());
        let part = &envelope["request"]["contents"][0]["parts"][0];
        assert!(part["thoughtSignature"].as_str().is_some());
    }

    #[test]
    fn existing_signatures_are_not_overwritten() {
        let body = json!({
            "contents": [{
                "role": "model",
                "parts": [{
                    "functionCall": { "name": "f", "args": {} },
                    "thoughtSignature": "KEEP-ME"
                }]
            }]
        });
        let envelope =
            wrap_gemini_request(&body, None, "gemini-2.5-pro", &ModelFeatures::default());
        assert_eq!(
            envelope["request"]["contents"][0]["parts"][0]["thoughtSignature"],
            "KEEP-ME"
        );
    }

    #[test]
    fn declarations_are_sanitized_and_restored() {
        let body = json!({
            "contents": [],
            "tools": [{
                "functionDeclarations": [{
                    "name": "my.tool",
                    "parameters": { "type": "object", "properties": {} }
                }]
            }]
        });
        let envelope =
            wrap_gemini_request(&body, None, "gemini-restore-test", &ModelFeatures::default());
        let declared = envelope["request"]["tools"][0]["functionDeclarations"][0]["name"]
            .as_str()
            .unwrap()
            .to_string();
        assert_ne!(declared, "my.tool");

        let mut response = json!({
            "candidates": [{
                "content": { "parts": [{ "functionCall": { "name": declared, "args": {} } }] }
            }]
        });
        restore_tool_names(&mut response, "gemini-restore-test");
        assert_eq!(
            response["candidates"][0]["content"]["parts"][0]["functionCall"]["name"],
            "my.tool"
        );
    }

    #[test]
    fn rebuilt_body_carries_parts_finish_and_usage() {
        use crate::proxy::mappers::common::{ParsedParts, ParsedToolCall, ParsedUsage};
        let parsed = ParsedParts {
            content: "hello".into(),
            reasoning: "mulling".into(),
            reasoning_signature: None,
            tool_calls: vec![ParsedToolCall {
                id: "call_1".into(),
                name: "f".into(),
                args: json!({"a": 1}),
                signature: None,
            }],
            finish_reason: Some("STOP".into()),
            usage: Some(ParsedUsage {
                prompt_tokens: 2,
                completion_tokens: 3,
                total_tokens: 5,
            }),
        };
        let body = build_gemini_response(&parsed, "gemini-2.5-pro");
        let parts = body["candidates"][0]["content"]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["thought"], true);
        assert_eq!(parts[1]["text"], "hello");
        assert_eq!(parts[2]["functionCall"]["name"], "f");
        assert_eq!(body["candidates"][0]["finishReason"], "STOP");
        assert_eq!(body["usageMetadata"]["totalTokenCount"], 5);
    }

    #[test]
    fn unwrap_peels_response_layer() {
        let wrapped = json!({ "response": { "candidates": [] } });
        let unwrapped = unwrap_gemini_response(&wrapped);
        assert!(unwrapped.get("candidates").is_some());
        assert!(unwrapped.get("response").is_none());

        let bare = json!({ "candidates": [] });
        assert_eq!(unwrap_gemini_response(&bare), bare);
    }

    #[test]
    fn thinking_override_rewrites_generation_config() {
        let body = json!({ "contents": [] });
        let features = ModelFeatures {
            thinking_budget_override: Some(0),
            ..Default::default()
        };
        let envelope = wrap_gemini_request(&body, None, "gemini-2.5-pro", &features);
        let config = &envelope["request"]["generationConfig"]["thinkingConfig"];
        assert_eq!(config["thinkingBudget"], 0);
        assert_eq!(config["includeThoughts"], false);
    }
}
