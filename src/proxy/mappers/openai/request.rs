use serde_json::{json, Value};
use std::collections::HashMap;

use super::models::{OpenAiContent, OpenAiContentBlock, OpenAiRequest};
use crate::proxy::mappers::common::{
    build_envelope, build_generation_config, default_safety_settings, fold_standalone_signatures,
    inject_google_search_tool, resolve_signature, GenerationOptions,
};
use crate::proxy::mappers::model_features::ModelFeatures;
use crate::proxy::mappers::tools::{clean_parameters, decode_tool_arguments, ToolNameRegistry};

/// OpenAI Chat Completions -> v1internal envelope.
pub fn transform_openai_request(
    request: &OpenAiRequest,
    project_id: Option<&str>,
    model: &str,
    features: &ModelFeatures,
) -> Value {
    let tool_signature = resolve_signature(model, true);
    let reasoning_signature = resolve_signature(model, false);

    // tool_call_id -> function name, for functionResponse attribution.
    let mut call_id_to_name: HashMap<String, String> = HashMap::new();
    for msg in &request.messages {
        if let Some(calls) = &msg.tool_calls {
            for call in calls {
                call_id_to_name.insert(call.id.clone(), call.function.name.clone());
            }
        }
    }

    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for msg in &request.messages {
        match msg.role.as_str() {
            "system" | "developer" => {
                let text = msg.text_content();
                if !text.is_empty() {
                    system_parts.push(json!({ "text": text }));
                }
            }
            "tool" | "function" => {
                let name = msg
                    .tool_call_id
                    .as_ref()
                    .and_then(|id| call_id_to_name.get(id).cloned())
                    .or_else(|| msg.name.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                let safe_name = ToolNameRegistry::global().register(model, &name);
                let part = json!({
                    "functionResponse": {
                        "name": safe_name,
                        "response": { "result": msg.text_content() },
                        "id": msg.tool_call_id.clone().unwrap_or_default(),
                    }
                });
                // Tool output rides on the last user turn, or opens one.
                match contents
                    .last_mut()
                    .filter(|c| c["role"] == "user")
                    .and_then(|c| c["parts"].as_array_mut())
                {
                    Some(parts) => parts.push(part),
                    None => contents.push(json!({ "role": "user", "parts": [part] })),
                }
            }
            role => {
                let upstream_role = if role == "assistant" { "model" } else { "user" };
                let mut parts: Vec<Value> = Vec::new();

                if upstream_role == "model" {
                    if let Some(reasoning) = &msg.reasoning_content {
                        if !reasoning.is_empty() && reasoning != "[undefined]" {
                            parts.push(json!({
                                "text": reasoning,
                                "thought": true,
                                "thoughtSignature": reasoning_signature,
                            }));
                        }
                    }
                }

                match &msg.content {
                    Some(OpenAiContent::String(s)) => {
                        if !s.is_empty() {
                            parts.push(json!({ "text": s }));
                        }
                    }
                    Some(OpenAiContent::Array(blocks)) => {
                        for block in blocks {
                            match block {
                                OpenAiContentBlock::Text { text } => {
                                    parts.push(json!({ "text": text }));
                                }
                                OpenAiContentBlock::ImageUrl { image_url } => {
                                    parts.extend(image_part(&image_url.url));
                                }
                            }
                        }
                    }
                    None => {}
                }

                if let Some(calls) = &msg.tool_calls {
                    for call in calls {
                        let safe_name =
                            ToolNameRegistry::global().register(model, &call.function.name);
                        // Tool continuation needs a signature even with
                        // thinking disabled.
                        parts.push(json!({
                            "functionCall": {
                                "name": safe_name,
                                "args": decode_tool_arguments(&call.function.arguments),
                                "id": call.id,
                            },
                            "thoughtSignature": tool_signature,
                        }));
                    }
                }

                if !parts.is_empty() {
                    contents.push(json!({ "role": upstream_role, "parts": parts }));
                }
            }
        }
    }

    let mut contents = merge_consecutive_roles(contents);
    let mut contents_value = Value::Array(std::mem::take(&mut contents));
    fold_standalone_signatures(&mut contents_value);

    let thinking_budget = features.thinking_budget_override.or_else(|| {
        request.thinking.as_ref().and_then(|t| {
            if t.thinking_type.as_deref() == Some("enabled") {
                Some(t.budget_tokens.unwrap_or(-1))
            } else if t.thinking_type.as_deref() == Some("disabled") {
                Some(0)
            } else {
                None
            }
        })
    });

    let gen_config = build_generation_config(&GenerationOptions {
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        max_output_tokens: request.max_tokens,
        stop_sequences: stop_sequences(&request.stop),
        thinking_budget,
        json_response: request
            .response_format
            .as_ref()
            .map(|f| f.r#type == "json_object")
            .unwrap_or(false),
    });

    let mut inner = json!({
        "contents": contents_value,
        "generationConfig": gen_config,
        "safetySettings": default_safety_settings(),
    });

    if !system_parts.is_empty() {
        inner["systemInstruction"] = json!({ "role": "user", "parts": system_parts });
    }

    if let Some(tools) = &request.tools {
        let declarations = build_function_declarations(tools, model);
        if !declarations.is_empty() {
            inner["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
    }

    if features.web_search {
        inject_google_search_tool(&mut inner);
    }

    build_envelope(model, project_id, inner)
}

fn image_part(url: &str) -> Option<Value> {
    if let Some(rest) = url.strip_prefix("data:") {
        let pos = rest.find(',')?;
        let mime_type = rest[..pos].split(';').next().unwrap_or("image/jpeg");
        let data = &rest[pos + 1..];
        Some(json!({ "inlineData": { "mimeType": mime_type, "data": data } }))
    } else if url.starts_with("http") {
        Some(json!({ "fileData": { "fileUri": url, "mimeType": "image/jpeg" } }))
    } else {
        tracing::debug!("[OpenAI-Request] Skipping unsupported image url scheme");
        None
    }
}

fn stop_sequences(stop: &Option<Value>) -> Vec<String> {
    match stop {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn merge_consecutive_roles(contents: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::new();
    for msg in contents {
        if let Some(last) = merged.last_mut() {
            if last["role"] == msg["role"] {
                if let (Some(last_parts), Some(msg_parts)) =
                    (last["parts"].as_array_mut(), msg["parts"].as_array())
                {
                    last_parts.extend(msg_parts.iter().cloned());
                    continue;
                }
            }
        }
        merged.push(msg);
    }
    merged
}

pub fn build_function_declarations(tools: &[Value], model: &str) -> Vec<Value> {
    let mut declarations = Vec::new();
    for tool in tools {
        let func = tool.get("function").unwrap_or(tool);
        let Some(name) = func.get("name").and_then(Value::as_str) else {
            tracing::warn!("[OpenAI-Request] Skipping tool without a name");
            continue;
        };
        if name == "web_search" || name == "google_search" {
            continue;
        }
        let safe_name = ToolNameRegistry::global().register(model, name);

        let mut params = func
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({ "type": "OBJECT", "properties": {} }));
        clean_parameters(&mut params);

        let mut declaration = json!({ "name": safe_name, "parameters": params });
        if let Some(description) = func.get("description").and_then(Value::as_str) {
            declaration["description"] = json!(description);
        }
        declarations.push(declaration);
    }
    declarations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::mappers::model_features::parse_model_features;
    use crate::proxy::mappers::openai::models::{OpenAiMessage, ToolCall, ToolFunction};
    use crate::proxy::signature_cache::SignatureCache;

    fn user_message(text: &str) -> OpenAiMessage {
        OpenAiMessage {
            role: "user".to_string(),
            content: Some(OpenAiContent::String(text.to_string())),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    fn base_request(messages: Vec<OpenAiMessage>) -> OpenAiRequest {
        OpenAiRequest {
            model: "gemini-2.5-pro".to_string(),
            messages,
            stream: false,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            response_format: None,
            tools: None,
            tool_choice: None,
            thinking: None,
        }
    }

    #[test]
    fn system_message_becomes_system_instruction() {
        let mut system = user_message("Be terse.");
        system.role = "system".to_string();
        let request = base_request(vec![system, user_message("hi")]);
        let envelope = transform_openai_request(
            &request,
            Some("proj-1"),
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );

        assert_eq!(
            envelope["request"]["systemInstruction"]["parts"][0]["text"],
            "Be terse."
        );
        let contents = envelope["request"]["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(envelope["project"], "proj-1");
        assert_eq!(envelope["model"], "gemini-2.5-pro");
    }

    #[test]
    fn tool_message_attaches_function_response_to_user_turn() {
        let _cache_guard = crate::test_utils::lock_signature_cache();
        SignatureCache::global().clear();
        let assistant = OpenAiMessage {
            role: "assistant".to_string(),
            content: None,
            reasoning_content: None,
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                call_type: Some("function".to_string()),
                function: ToolFunction {
                    name: "get_weather".to_string(),
                    arguments: "{\"city\":\"BJ\"}".to_string(),
                },
            }]),
            tool_call_id: None,
            name: None,
        };
        let tool = OpenAiMessage {
            role: "tool".to_string(),
            content: Some(OpenAiContent::String("sunny".to_string())),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: Some("call_1".to_string()),
            name: None,
        };
        let request = base_request(vec![user_message("weather?"), assistant, tool]);
        let envelope = transform_openai_request(
            &request,
            None,
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );

        let contents = envelope["request"]["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        let fc = &contents[1]["parts"][0];
        assert_eq!(fc["functionCall"]["name"], "get_weather");
        assert_eq!(fc["functionCall"]["args"]["city"], "BJ");
        // Tool continuation carries a signature even without thinking.
        assert!(fc["thoughtSignature"].as_str().is_some());

        assert_eq!(contents[2]["role"], "user");
        let fr = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(fr["name"], "get_weather");
        assert_eq!(fr["response"]["result"], "sunny");
        assert_eq!(fr["id"], "call_1");
    }

    #[test]
    fn cached_tool_signature_is_replayed_on_function_calls() {
        let _cache_guard = crate::test_utils::lock_signature_cache();
        SignatureCache::global().clear();
        let long_sig = "CACHED-TOOL-SIGNATURE-000000000000000000";
        SignatureCache::global().set_signature(
            None,
            "gemini-9-test",
            long_sig,
            "",
            crate::proxy::signature_cache::SignatureContext {
                has_tools: true,
                is_image_model: false,
            },
        );

        let assistant = OpenAiMessage {
            role: "assistant".to_string(),
            content: None,
            reasoning_content: None,
            tool_calls: Some(vec![ToolCall {
                id: "call_9".to_string(),
                call_type: None,
                function: ToolFunction {
                    name: "lookup".to_string(),
                    arguments: "{}".to_string(),
                },
            }]),
            tool_call_id: None,
            name: None,
        };
        let mut request = base_request(vec![user_message("q"), assistant]);
        request.model = "gemini-9-test".to_string();
        let envelope =
            transform_openai_request(&request, None, "gemini-9-test", &ModelFeatures::default());

        let part = &envelope["request"]["contents"][1]["parts"][0];
        assert_eq!(part["thoughtSignature"], long_sig);
        SignatureCache::global().clear();
    }

    #[test]
    fn unknown_model_falls_back_to_sentinel_signature() {
        let _cache_guard = crate::test_utils::lock_signature_cache();
        SignatureCache::global().clear();
        let assistant = OpenAiMessage {
            role: "assistant".to_string(),
            content: None,
            reasoning_content: Some("prior thought".to_string()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };
        let mut request = base_request(vec![user_message("q"), assistant]);
        request.model = "model-without-default".to_string();
        let envelope = transform_openai_request(
            &request,
            None,
            "model-without-default",
            &ModelFeatures::default(),
        );
        let thought = &envelope["request"]["contents"][1]["parts"][0];
        assert_eq!(thought["thought"], true);
        assert_eq!(
            thought["thoughtSignature"],
            crate::constants::SKIP_SIGNATURE_SENTINEL
        );
    }

    #[test]
    fn tools_are_sanitized_and_cleaned() {
        let mut request = base_request(vec![user_message("hi")]);
        request.tools = Some(vec![json!({
            "type": "function",
            "function": {
                "name": "mcp__fs.read",
                "description": "read a file",
                "parameters": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": { "path": { "type": "string" } }
                }
            }
        })]);
        let envelope = transform_openai_request(
            &request,
            None,
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );

        let decl = &envelope["request"]["tools"][0]["functionDeclarations"][0];
        let safe = decl["name"].as_str().unwrap();
        assert!(safe.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        assert_eq!(
            ToolNameRegistry::global()
                .resolve("gemini-2.5-pro", safe)
                .as_deref(),
            Some("mcp__fs.read")
        );
        assert_eq!(decl["parameters"]["type"], "OBJECT");
        assert_eq!(decl["parameters"]["properties"]["path"]["type"], "STRING");
        assert!(decl["parameters"].get("additionalProperties").is_none());
    }

    #[test]
    fn search_flag_appends_google_search_tool() {
        let (model, features) = parse_model_features("gemini-2.5-pro-search");
        let request = base_request(vec![user_message("latest news")]);
        let envelope = transform_openai_request(&request, None, &model, &features);
        let tools = envelope["request"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t.get("googleSearch").is_some()));
    }

    #[test]
    fn nothinking_override_zeroes_budget() {
        let (model, features) = parse_model_features("gemini-2.5-pro-nothinking");
        let request = base_request(vec![user_message("hi")]);
        let envelope = transform_openai_request(&request, None, &model, &features);
        let config = &envelope["request"]["generationConfig"]["thinkingConfig"];
        assert_eq!(config["thinkingBudget"], 0);
        assert_eq!(config["includeThoughts"], false);
    }

    #[test]
    fn consecutive_same_role_messages_are_merged() {
        let request = base_request(vec![user_message("one"), user_message("two")]);
        let envelope = transform_openai_request(
            &request,
            None,
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );
        let contents = envelope["request"]["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["parts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn data_url_image_becomes_inline_data() {
        let message = OpenAiMessage {
            role: "user".to_string(),
            content: Some(OpenAiContent::Array(vec![
                OpenAiContentBlock::Text {
                    text: "what is this?".to_string(),
                },
                OpenAiContentBlock::ImageUrl {
                    image_url: crate::proxy::mappers::openai::models::OpenAiImageUrl {
                        url: "data:image/png;base64,QUJD".to_string(),
                        detail: None,
                    },
                },
            ])),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };
        let request = base_request(vec![message]);
        let envelope = transform_openai_request(
            &request,
            None,
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );
        let parts = envelope["request"]["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "QUJD");
    }
}
