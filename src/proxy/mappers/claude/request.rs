use serde_json::{json, Value};
use std::collections::HashMap;

use super::models::{ClaudeContent, ClaudeContentBlock, ClaudeRequest};
use crate::proxy::mappers::common::{
    build_envelope, build_generation_config, default_safety_settings, fold_standalone_signatures,
    inject_google_search_tool, resolve_signature, GenerationOptions,
};
use crate::proxy::mappers::model_features::ModelFeatures;
use crate::proxy::mappers::tools::{clean_parameters, ToolNameRegistry};

/// Anthropic Messages -> v1internal envelope.
pub fn transform_claude_request(
    request: &ClaudeRequest,
    project_id: Option<&str>,
    model: &str,
    features: &ModelFeatures,
) -> Value {
    let tool_signature = resolve_signature(model, true);
    let reasoning_signature = resolve_signature(model, false);

    // tool_use_id -> name so tool_result parts can name their function.
    let mut use_id_to_name: HashMap<String, String> = HashMap::new();
    for msg in &request.messages {
        if let ClaudeContent::Blocks(blocks) = &msg.content {
            for block in blocks {
                if let ClaudeContentBlock::ToolUse { id, name, .. } = block {
                    use_id_to_name.insert(id.clone(), name.clone());
                }
            }
        }
    }

    let mut contents: Vec<Value> = Vec::new();
    for msg in &request.messages {
        let role = if msg.role == "assistant" { "model" } else { "user" };
        let mut parts: Vec<Value> = Vec::new();

        match &msg.content {
            ClaudeContent::String(text) => {
                if !text.is_empty() {
                    parts.push(json!({ "text": text }));
                }
            }
            ClaudeContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ClaudeContentBlock::Text { text } => {
                            if !text.is_empty() {
                                parts.push(json!({ "text": text }));
                            }
                        }
                        ClaudeContentBlock::Thinking { thinking, signature } => {
                            parts.push(json!({
                                "text": thinking,
                                "thought": true,
                                "thoughtSignature": signature
                                    .clone()
                                    .unwrap_or_else(|| reasoning_signature.clone()),
                            }));
                        }
                        ClaudeContentBlock::ToolUse { id, name, input } => {
                            let safe_name = ToolNameRegistry::global().register(model, name);
                            parts.push(json!({
                                "functionCall": {
                                    "name": safe_name,
                                    "args": input,
                                    "id": id,
                                },
                                "thoughtSignature": tool_signature,
                            }));
                        }
                        ClaudeContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => {
                            let name = use_id_to_name
                                .get(tool_use_id)
                                .cloned()
                                .unwrap_or_else(|| "unknown".to_string());
                            let safe_name = ToolNameRegistry::global().register(model, &name);
                            let mut response =
                                json!({ "result": tool_result_text(content.as_ref()) });
                            if is_error.unwrap_or(false) {
                                response["is_error"] = json!(true);
                            }
                            parts.push(json!({
                                "functionResponse": {
                                    "name": safe_name,
                                    "response": response,
                                    "id": tool_use_id,
                                }
                            }));
                        }
                        ClaudeContentBlock::Image { source } => {
                            if source.source_type == "base64" {
                                parts.push(json!({
                                    "inlineData": {
                                        "mimeType": source
                                            .media_type
                                            .clone()
                                            .unwrap_or_else(|| "image/jpeg".to_string()),
                                        "data": source.data.clone().unwrap_or_default(),
                                    }
                                }));
                            } else if let Some(url) = &source.url {
                                parts.push(json!({
                                    "fileData": { "fileUri": url, "mimeType": "image/jpeg" }
                                }));
                            }
                        }
                        ClaudeContentBlock::Unknown => {}
                    }
                }
            }
        }

        if parts.is_empty() {
            continue;
        }
        match contents
            .last_mut()
            .filter(|c| c["role"] == role)
            .and_then(|c| c["parts"].as_array_mut())
        {
            Some(existing) => existing.extend(parts),
            None => contents.push(json!({ "role": role, "parts": parts })),
        }
    }

    let mut contents_value = Value::Array(contents);
    fold_standalone_signatures(&mut contents_value);

    let thinking_budget = features.thinking_budget_override.or_else(|| {
        request.thinking.as_ref().and_then(|t| {
            match t.thinking_type.as_deref() {
                Some("enabled") => Some(t.budget_tokens.unwrap_or(-1)),
                Some("disabled") => Some(0),
                _ => None,
            }
        })
    });

    let gen_config = build_generation_config(&GenerationOptions {
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        max_output_tokens: request.max_tokens,
        stop_sequences: request.stop_sequences.clone(),
        thinking_budget,
        json_response: false,
    });

    let mut inner = json!({
        "contents": contents_value,
        "generationConfig": gen_config,
        "safetySettings": default_safety_settings(),
    });

    if let Some(system) = request.system_text() {
        inner["systemInstruction"] = json!({
            "role": "user",
            "parts": [{ "text": system }],
        });
    }

    if let Some(tools) = &request.tools {
        let declarations = build_claude_declarations(tools, model);
        if !declarations.is_empty() {
            inner["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
    }

    if features.web_search {
        inject_google_search_tool(&mut inner);
    }

    build_envelope(model, project_id, inner)
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn build_claude_declarations(tools: &[Value], model: &str) -> Vec<Value> {
    let mut declarations = Vec::new();
    for tool in tools {
        let Some(name) = tool.get("name").and_then(Value::as_str) else {
            continue;
        };
        if name.starts_with("web_search") {
            continue;
        }
        let safe_name = ToolNameRegistry::global().register(model, name);
        let mut params = tool
            .get("input_schema")
            .cloned()
            .unwrap_or_else(|| json!({ "type": "OBJECT", "properties": {} }));
        clean_parameters(&mut params);

        let mut declaration = json!({ "name": safe_name, "parameters": params });
        if let Some(description) = tool.get("description").and_then(Value::as_str) {
            declaration["description"] = json!(description);
        }
        declarations.push(declaration);
    }
    declarations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::mappers::claude::models::ClaudeMessage;
    use crate::proxy::signature_cache::SignatureCache;

    fn request_from(messages: Vec<ClaudeMessage>) -> ClaudeRequest {
        ClaudeRequest {
            model: "gemini-2.5-pro".to_string(),
            messages,
            system: None,
            stream: false,
            max_tokens: Some(1024),
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
            tools: None,
            tool_choice: None,
            thinking: None,
        }
    }

    fn message(role: &str, content: ClaudeContent) -> ClaudeMessage {
        ClaudeMessage {
            role: role.to_string(),
            content,
        }
    }

    #[test]
    fn thinking_block_becomes_thought_part_with_its_signature() {
        let _cache_guard = crate::test_utils::lock_signature_cache();
        SignatureCache::global().clear();
        let request = request_from(vec![
            message("user", ClaudeContent::String("hi".into())),
            message(
                "assistant",
                ClaudeContent::Blocks(vec![
                    ClaudeContentBlock::Thinking {
                        thinking: "let me think".into(),
                        signature: Some("SIG-FROM-CLIENT".into()),
                    },
                    ClaudeContentBlock::Text {
                        text: "hello".into(),
                    },
                ]),
            ),
        ]);
        let envelope = transform_claude_request(
            &request,
            Some("proj"),
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );

        let parts = envelope["request"]["contents"][1]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["thought"], true);
        assert_eq!(parts[0]["text"], "let me think");
        assert_eq!(parts[0]["thoughtSignature"], "SIG-FROM-CLIENT");
        assert_eq!(parts[1]["text"], "hello");
    }

    #[test]
    fn tool_use_and_result_round_trip_to_function_parts() {
        let _cache_guard = crate::test_utils::lock_signature_cache();
        SignatureCache::global().clear();
        let request = request_from(vec![
            message("user", ClaudeContent::String("weather?".into())),
            message(
                "assistant",
                ClaudeContent::Blocks(vec![ClaudeContentBlock::ToolUse {
                    id: "toolu_1".into(),
                    name: "get_weather".into(),
                    input: json!({"city": "BJ"}),
                }]),
            ),
            message(
                "user",
                ClaudeContent::Blocks(vec![ClaudeContentBlock::ToolResult {
                    tool_use_id: "toolu_1".into(),
                    content: Some(Value::String("sunny".into())),
                    is_error: None,
                }]),
            ),
        ]);
        let envelope = transform_claude_request(
            &request,
            None,
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );

        let contents = envelope["request"]["contents"].as_array().unwrap();
        let call = &contents[1]["parts"][0];
        assert_eq!(call["functionCall"]["name"], "get_weather");
        assert_eq!(call["functionCall"]["id"], "toolu_1");
        assert!(call["thoughtSignature"].as_str().is_some());

        let result = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(result["name"], "get_weather");
        assert_eq!(result["response"]["result"], "sunny");
        assert_eq!(result["id"], "toolu_1");
    }

    #[test]
    fn tool_result_error_flag_is_preserved() {
        let request = request_from(vec![
            message(
                "assistant",
                ClaudeContent::Blocks(vec![ClaudeContentBlock::ToolUse {
                    id: "toolu_2".into(),
                    name: "run".into(),
                    input: json!({}),
                }]),
            ),
            message(
                "user",
                ClaudeContent::Blocks(vec![ClaudeContentBlock::ToolResult {
                    tool_use_id: "toolu_2".into(),
                    content: Some(json!([{"type": "text", "text": "boom"}])),
                    is_error: Some(true),
                }]),
            ),
        ]);
        let envelope = transform_claude_request(
            &request,
            None,
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );
        let response = &envelope["request"]["contents"][1]["parts"][0]["functionResponse"]["response"];
        assert_eq!(response["result"], "boom");
        assert_eq!(response["is_error"], true);
    }

    #[test]
    fn system_string_and_blocks_both_map_to_system_instruction() {
        let mut request = request_from(vec![message("user", ClaudeContent::String("q".into()))]);
        request.system = Some(Value::String("be brief".into()));
        let envelope = transform_claude_request(
            &request,
            None,
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );
        assert_eq!(
            envelope["request"]["systemInstruction"]["parts"][0]["text"],
            "be brief"
        );

        request.system = Some(json!([
            {"type": "text", "text": "one"},
            {"type": "text", "text": "two"}
        ]));
        let envelope = transform_claude_request(
            &request,
            None,
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );
        assert_eq!(
            envelope["request"]["systemInstruction"]["parts"][0]["text"],
            "one\ntwo"
        );
    }

    #[test]
    fn claude_tools_use_input_schema() {
        let mut request = request_from(vec![message("user", ClaudeContent::String("q".into()))]);
        request.tools = Some(vec![json!({
            "name": "get_weather",
            "description": "weather lookup",
            "input_schema": {
                "type": "object",
                "properties": { "city": { "type": "string" } }
            }
        })]);
        let envelope = transform_claude_request(
            &request,
            None,
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );
        let decl = &envelope["request"]["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["name"], "get_weather");
        assert_eq!(decl["parameters"]["type"], "OBJECT");
        assert_eq!(decl["description"], "weather lookup");
    }

    #[test]
    fn max_tokens_and_stops_land_in_generation_config() {
        let mut request = request_from(vec![message("user", ClaudeContent::String("q".into()))]);
        request.stop_sequences = vec!["END".to_string()];
        request.max_tokens = Some(2048);
        let envelope = transform_claude_request(
            &request,
            None,
            "gemini-2.5-pro",
            &ModelFeatures::default(),
        );
        let config = &envelope["request"]["generationConfig"];
        assert_eq!(config["maxOutputTokens"], 2048);
        assert_eq!(config["stopSequences"][0], "END");
    }
}
