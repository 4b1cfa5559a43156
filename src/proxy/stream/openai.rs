use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};

use super::events::{StreamEvent, UsageEvent};
use crate::proxy::mappers::common::map_finish_reason_openai;

fn sse_frame(v: &Value) -> Bytes {
    Bytes::from(format!(
        "data: {}\n\n",
        serde_json::to_string(v).unwrap_or_default()
    ))
}

pub fn usage_json(usage: &UsageEvent) -> Value {
    json!({
        "prompt_tokens": usage.prompt,
        "completion_tokens": usage.completion,
        "total_tokens": usage.total,
    })
}

/// Re-serializes neutral events as OpenAI chat completion chunks. The
/// first content-bearing chunk seeds `role: "assistant"`; the terminator
/// is `data: [DONE]`.
pub struct OpenAiStreamWriter {
    stream_id: String,
    created: i64,
    model: String,
    role_sent: bool,
    saw_tool_calls: bool,
    usage: Option<UsageEvent>,
    tool_call_index: u32,
    done_sent: bool,
}

impl OpenAiStreamWriter {
    pub fn new(model: &str) -> Self {
        Self {
            stream_id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: Utc::now().timestamp(),
            model: model.to_string(),
            role_sent: false,
            saw_tool_calls: false,
            usage: None,
            tool_call_index: 0,
            done_sent: false,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>, usage: Option<&UsageEvent>) -> Value {
        let mut chunk = json!({
            "id": &self.stream_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": &self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }]
        });
        if let Some(usage) = usage {
            chunk["usage"] = usage_json(usage);
        }
        chunk
    }

    fn delta_with_role(&mut self, mut delta: Value) -> Value {
        if !self.role_sent {
            self.role_sent = true;
            if let Some(obj) = delta.as_object_mut() {
                obj.insert("role".to_string(), json!("assistant"));
            }
        }
        delta
    }

    pub fn write(&mut self, event: &StreamEvent) -> Vec<Bytes> {
        match event {
            StreamEvent::Text { text } => {
                let delta = self.delta_with_role(json!({ "content": text }));
                vec![sse_frame(&self.chunk(delta, None, None))]
            }
            StreamEvent::Reasoning { text, .. } => {
                let delta = self.delta_with_role(json!({
                    "content": Value::Null,
                    "reasoning_content": text,
                }));
                vec![sse_frame(&self.chunk(delta, None, None))]
            }
            StreamEvent::ToolCalls { calls } => {
                self.saw_tool_calls = true;
                let tool_calls: Vec<Value> = calls
                    .iter()
                    .map(|call| {
                        let idx = self.tool_call_index;
                        self.tool_call_index += 1;
                        json!({
                            "index": idx,
                            "id": call.id,
                            "type": "function",
                            "function": { "name": call.name, "arguments": call.args_json }
                        })
                    })
                    .collect();
                let delta = self.delta_with_role(json!({ "tool_calls": tool_calls }));
                vec![sse_frame(&self.chunk(delta, None, None))]
            }
            StreamEvent::Usage(usage) => {
                self.usage = Some(*usage);
                Vec::new()
            }
            StreamEvent::Done { finish_reason } => {
                let mapped = map_finish_reason_openai(finish_reason, self.saw_tool_calls);
                let usage = self.usage.take();
                vec![sse_frame(&self.chunk(json!({}), Some(mapped), usage.as_ref()))]
            }
        }
    }

    /// Stream terminator, emitted exactly once.
    pub fn finish(&mut self) -> Vec<Bytes> {
        if self.done_sent {
            return Vec::new();
        }
        self.done_sent = true;
        vec![Bytes::from("data: [DONE]\n\n")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::stream::events::ToolCallEvent;

    fn frames_to_json(frames: &[Bytes]) -> Vec<Value> {
        frames
            .iter()
            .flat_map(|b| {
                String::from_utf8(b.to_vec())
                    .unwrap()
                    .lines()
                    .filter(|l| l.starts_with("data: ") && !l.contains("[DONE]"))
                    .filter_map(|l| serde_json::from_str::<Value>(&l["data: ".len()..]).ok())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn first_chunk_seeds_assistant_role() {
        let mut writer = OpenAiStreamWriter::new("gemini-2.5-pro");
        let frames = writer.write(&StreamEvent::Text { text: "Hi".into() });
        let chunks = frames_to_json(&frames);
        assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "Hi");

        let frames = writer.write(&StreamEvent::Text { text: "!".into() });
        let chunks = frames_to_json(&frames);
        assert!(chunks[0]["choices"][0]["delta"].get("role").is_none());
    }

    #[test]
    fn tool_calls_get_sequential_indices_and_finish_maps_to_tool_calls() {
        let mut writer = OpenAiStreamWriter::new("gemini-2.5-pro");
        let frames = writer.write(&StreamEvent::ToolCalls {
            calls: vec![
                ToolCallEvent {
                    id: "call_1".into(),
                    name: "get_weather".into(),
                    args_json: "{\"city\":\"BJ\"}".into(),
                    signature: None,
                },
                ToolCallEvent {
                    id: "call_2".into(),
                    name: "get_time".into(),
                    args_json: "{}".into(),
                    signature: None,
                },
            ],
        });
        let chunks = frames_to_json(&frames);
        let calls = chunks[0]["choices"][0]["delta"]["tool_calls"]
            .as_array()
            .unwrap();
        assert_eq!(calls[0]["index"], 0);
        assert_eq!(calls[1]["index"], 1);
        assert_eq!(calls[0]["function"]["name"], "get_weather");
        assert_eq!(calls[0]["function"]["arguments"], "{\"city\":\"BJ\"}");

        writer.write(&StreamEvent::Usage(UsageEvent {
            prompt: 10,
            completion: 4,
            total: 14,
        }));
        let frames = writer.write(&StreamEvent::Done {
            finish_reason: "STOP".into(),
        });
        let chunks = frames_to_json(&frames);
        assert_eq!(chunks[0]["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(chunks[0]["usage"]["total_tokens"], 14);
    }

    #[test]
    fn reasoning_goes_to_reasoning_content() {
        let mut writer = OpenAiStreamWriter::new("m");
        let frames = writer.write(&StreamEvent::Reasoning {
            text: "thinking".into(),
            signature: None,
        });
        let chunks = frames_to_json(&frames);
        assert_eq!(
            chunks[0]["choices"][0]["delta"]["reasoning_content"],
            "thinking"
        );
    }

    #[test]
    fn finish_emits_done_once() {
        let mut writer = OpenAiStreamWriter::new("m");
        let first = writer.finish();
        assert_eq!(first.len(), 1);
        assert_eq!(&first[0][..], b"data: [DONE]\n\n");
        assert!(writer.finish().is_empty());
    }
}
