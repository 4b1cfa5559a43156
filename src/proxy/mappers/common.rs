use serde_json::{json, Value};

use crate::constants;
use crate::proxy::mappers::tools::ToolNameRegistry;
use crate::proxy::signature_cache::SignatureCache;

/// Knobs shared by every dialect's generation config. Values are clamped
/// into the ranges the upstream accepts before serialization.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<i64>,
    pub max_output_tokens: Option<i64>,
    pub stop_sequences: Vec<String>,
    /// 0 disables thinking, -1 means unlimited, anything else is literal.
    pub thinking_budget: Option<i64>,
    pub json_response: bool,
}

pub fn build_generation_config(opts: &GenerationOptions) -> Value {
    let mut config = json!({
        "temperature": opts.temperature.unwrap_or(1.0).clamp(0.0, 2.0),
        "topP": opts.top_p.unwrap_or(0.95).clamp(0.0, 1.0),
    });

    if let Some(top_k) = opts.top_k {
        config["topK"] = json!(top_k.clamp(1, 64));
    }
    if let Some(max_tokens) = opts.max_output_tokens {
        config["maxOutputTokens"] = json!(max_tokens.clamp(1, 65536));
    }
    if !opts.stop_sequences.is_empty() {
        config["stopSequences"] = json!(opts.stop_sequences);
    }
    if opts.json_response {
        config["responseMimeType"] = json!("application/json");
    }

    match opts.thinking_budget {
        Some(0) => {
            config["thinkingConfig"] = json!({
                "includeThoughts": false,
                "thinkingBudget": 0
            });
        }
        Some(budget) => {
            config["thinkingConfig"] = json!({
                "includeThoughts": true,
                "thinkingBudget": if budget < 0 { -1 } else { budget }
            });
        }
        None => {}
    }

    config
}

/// Signature resolution order: cache under `(model, bucket)`, then the
/// per-model default table, then the upstream bypass sentinel.
pub fn resolve_signature(model: &str, has_tools: bool) -> String {
    SignatureCache::global()
        .get_signature(None, model, has_tools)
        .or_else(|| constants::default_signature_for_model(model).map(str::to_string))
        .unwrap_or_else(|| constants::SKIP_SIGNATURE_SENTINEL.to_string())
}

pub fn default_safety_settings() -> Value {
    json!([
        { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": "OFF" },
    ])
}

/// Wraps a converted inner request in the v1internal envelope.
pub fn build_envelope(model: &str, project: Option<&str>, inner_request: Value) -> Value {
    let mut envelope = json!({
        "model": model,
        "user_prompt_id": format!("prompt-{}", uuid::Uuid::new_v4()),
        "request": inner_request,
    });
    if let Some(project) = project {
        envelope["project"] = json!(project);
    }
    envelope
}

pub fn inject_google_search_tool(inner_request: &mut Value) {
    let tools = inner_request
        .as_object_mut()
        .map(|obj| obj.entry("tools").or_insert_with(|| json!([])));
    if let Some(Value::Array(tools)) = tools {
        let already_present = tools.iter().any(|t| t.get("googleSearch").is_some());
        if !already_present {
            tools.push(json!({ "googleSearch": {} }));
        }
    }
}

fn is_signature_only_part(part: &Value) -> bool {
    let Some(obj) = part.as_object() else {
        return false;
    };
    obj.contains_key("thoughtSignature")
        && !obj.contains_key("text")
        && !obj.contains_key("functionCall")
        && !obj.contains_key("functionResponse")
        && !obj.contains_key("inlineData")
        && !obj.contains_key("fileData")
}

fn accepts_signature(part: &Value) -> bool {
    part.get("thought").and_then(Value::as_bool).unwrap_or(false)
        || part.get("functionCall").is_some()
        || part.get("inlineData").is_some()
}

/// Model turns sometimes arrive with the signature split into standalone
/// placeholder parts. Fold each onto the nearest signature-bearing part
/// (previous first, then next) and drop the placeholders.
pub fn fold_standalone_signatures(contents: &mut Value) {
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

        let mut idx = 0;
        while idx < parts.len() {
            if !is_signature_only_part(&parts[idx]) {
                idx += 1;
                continue;
            }
            let signature = parts[idx]
                .get("thoughtSignature")
                .cloned()
                .unwrap_or(Value::Null);

            let mut target = None;
            if idx > 0 && accepts_signature(&parts[idx - 1]) {
                target = Some(idx - 1);
            } else if idx + 1 < parts.len() && accepts_signature(&parts[idx + 1]) {
                target = Some(idx + 1);
            }

            if let Some(target) = target {
                if let Some(obj) = parts[target].as_object_mut() {
                    obj.entry("thoughtSignature").or_insert(signature);
                }
            }
            parts.remove(idx);
        }
    }
}

pub fn map_finish_reason_openai(upstream: &str, has_tool_calls: bool) -> &'static str {
    if has_tool_calls {
        return "tool_calls";
    }
    match upstream {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" => "content_filter",
        _ => "stop",
    }
}

pub fn map_finish_reason_claude(upstream: &str, has_tool_calls: bool) -> &'static str {
    if has_tool_calls {
        return "tool_use";
    }
    match upstream {
        "MAX_TOKENS" => "max_tokens",
        _ => "end_turn",
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// The non-stream view of one upstream response: candidate zero's parts
/// split into text, reasoning and tool calls, plus finish/usage metadata.
#[derive(Debug, Clone, Default)]
pub struct ParsedParts {
    pub content: String,
    pub reasoning: String,
    pub reasoning_signature: Option<String>,
    pub tool_calls: Vec<ParsedToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<ParsedUsage>,
}

pub fn parse_usage_metadata(usage: &Value) -> ParsedUsage {
    ParsedUsage {
        prompt_tokens: usage
            .get("promptTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        completion_tokens: usage
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        total_tokens: usage
            .get("totalTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    }
}

fn stable_tool_call_id(func_call: &Value) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    serde_json::to_string(func_call)
        .unwrap_or_default()
        .hash(&mut hasher);
    format!("call_{:x}", hasher.finish())
}

/// Shared parser over `candidates[0].content.parts`. Both the non-stream
/// path and the fake-stream replay are built on this.
pub fn parse_candidate_parts(response: &Value, model: &str) -> ParsedParts {
    let response = response.get("response").unwrap_or(response);
    let mut parsed = ParsedParts::default();

    if let Some(usage) = response.get("usageMetadata") {
        parsed.usage = Some(parse_usage_metadata(usage));
    }

    let Some(candidate) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    else {
        return parsed;
    };

    parsed.finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(str::to_string);

    let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    else {
        return parsed;
    };

    let mut last_signature: Option<String> = None;
    for part in parts {
        let signature = part
            .get("thoughtSignature")
            .or_else(|| part.get("thought_signature"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if signature.is_some() {
            last_signature = signature.clone();
        }

        if let Some(func_call) = part.get("functionCall") {
            let safe_name = func_call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let name = ToolNameRegistry::global().resolve_or_passthrough(model, safe_name);
            let id = func_call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| stable_tool_call_id(func_call));
            parsed.tool_calls.push(ParsedToolCall {
                id,
                name,
                args: func_call.get("args").cloned().unwrap_or_else(|| json!({})),
                signature: signature.clone().or_else(|| last_signature.clone()),
            });
            continue;
        }

        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                parsed.reasoning.push_str(text);
                if signature.is_some() {
                    parsed.reasoning_signature = signature;
                }
            } else {
                parsed.content.push_str(text);
            }
            continue;
        }

        if let Some(inline) = part.get("inlineData") {
            let mime_type = inline
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            let data = inline.get("data").and_then(Value::as_str).unwrap_or("");
            if !data.is_empty() {
                parsed
                    .content
                    .push_str(&format!("![image](data:{};base64,{})", mime_type, data));
            }
        }
    }

    parsed
}
