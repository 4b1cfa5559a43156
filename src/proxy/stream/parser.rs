use serde_json::{json, Value};

use super::events::{StreamEvent, ToolCallEvent, UsageEvent};
use crate::proxy::mappers::common::parse_usage_metadata;
use crate::proxy::mappers::tools::ToolNameRegistry;
use crate::proxy::signature_cache::{SignatureCache, SignatureContext};

/// Emitter state machine over upstream SSE lines. Feeds on the output of
/// `LineBuffer` and produces the neutral event stream; on `finishReason`
/// it flushes buffered tool calls, usage and `Done`, and writes the
/// accumulated reasoning signature back into the signature cache.
pub struct SseParser {
    model: String,
    session_id: Option<String>,
    has_tools: bool,
    is_image_model: bool,
    reasoning_content: String,
    reasoning_signature: Option<String>,
    last_signature: Option<String>,
    tool_calls: Vec<ToolCallEvent>,
    usage: Option<UsageEvent>,
    done: bool,
}

impl SseParser {
    pub fn new(model: &str, session_id: Option<&str>, has_tools: bool, is_image_model: bool) -> Self {
        Self {
            model: model.to_string(),
            session_id: session_id.map(str::to_string),
            has_tools,
            is_image_model,
            reasoning_content: String::new(),
            reasoning_signature: None,
            last_signature: None,
            tool_calls: Vec::new(),
            usage: None,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let line = line.trim();
        if line.is_empty() || !line.starts_with("data: ") {
            return Vec::new();
        }
        let payload = line["data: ".len()..].trim();
        if payload.is_empty() || payload == "[DONE]" {
            return Vec::new();
        }
        let Ok(parsed) = serde_json::from_str::<Value>(payload) else {
            tracing::debug!("[SseParser] Skipping unparseable data line ({} bytes)", payload.len());
            return Vec::new();
        };
        self.push_chunk(&parsed)
    }

    pub fn push_chunk(&mut self, chunk: &Value) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        let response = chunk.get("response").unwrap_or(chunk);
        let mut events = Vec::new();

        if let Some(usage) = response.get("usageMetadata") {
            let parsed = parse_usage_metadata(usage);
            self.usage = Some(UsageEvent {
                prompt: parsed.prompt_tokens,
                completion: parsed.completion_tokens,
                total: parsed.total_tokens,
            });
        }

        let candidate = response
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first());

        if let Some(parts) = candidate
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        {
            for part in parts {
                events.extend(self.process_part(part));
            }
        }

        if let Some(finish) = candidate
            .and_then(|c| c.get("finishReason"))
            .and_then(Value::as_str)
        {
            events.extend(self.finish(finish));
        }

        events
    }

    fn process_part(&mut self, part: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let signature = part
            .get("thoughtSignature")
            .or_else(|| part.get("thought_signature"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if signature.is_some() {
            self.last_signature = signature.clone();
        }

        if let Some(func_call) = part.get("functionCall") {
            let safe_name = func_call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let name = ToolNameRegistry::global().resolve_or_passthrough(&self.model, safe_name);
            let args = func_call.get("args").cloned().unwrap_or_else(|| json!({}));
            let id = func_call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            self.tool_calls.push(ToolCallEvent {
                id,
                name,
                args_json: serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()),
                signature: signature.clone().or_else(|| self.last_signature.clone()),
            });
            return events;
        }

        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                self.reasoning_content.push_str(text);
                if signature.is_some() {
                    self.reasoning_signature = signature.clone();
                }
                events.push(StreamEvent::Reasoning {
                    text: text.to_string(),
                    signature,
                });
            } else if !text.is_empty() {
                events.push(StreamEvent::Text {
                    text: text.to_string(),
                });
            }
            return events;
        }

        if let Some(inline) = part.get("inlineData") {
            let mime_type = inline
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            let data = inline.get("data").and_then(Value::as_str).unwrap_or("");
            if !data.is_empty() {
                events.push(StreamEvent::Text {
                    text: format!("![image](data:{};base64,{})", mime_type, data),
                });
            }
        }

        events
    }

    fn finish(&mut self, finish_reason: &str) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        self.cache_signatures();

        let mut events = Vec::new();
        if !self.tool_calls.is_empty() {
            events.push(StreamEvent::ToolCalls {
                calls: std::mem::take(&mut self.tool_calls),
            });
        }
        if let Some(usage) = self.usage {
            events.push(StreamEvent::Usage(usage));
        }
        events.push(StreamEvent::Done {
            finish_reason: finish_reason.to_string(),
        });
        events
    }

    fn cache_signatures(&self) {
        let cache = SignatureCache::global();
        let session_id = self.session_id.as_deref();
        if let Some(sig) = &self.reasoning_signature {
            cache.set_signature(
                session_id,
                &self.model,
                sig,
                &self.reasoning_content,
                SignatureContext {
                    has_tools: false,
                    is_image_model: self.is_image_model,
                },
            );
        }
        if self.has_tools {
            let tool_sig = self
                .tool_calls
                .iter()
                .rev()
                .find_map(|c| c.signature.clone())
                .or_else(|| self.reasoning_signature.clone());
            if let Some(sig) = tool_sig {
                cache.set_signature(
                    session_id,
                    &self.model,
                    &sig,
                    &self.reasoning_content,
                    SignatureContext {
                        has_tools: true,
                        is_image_model: self.is_image_model,
                    },
                );
            }
        }
    }
}
