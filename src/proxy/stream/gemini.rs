use bytes::Bytes;
use serde_json::{json, Value};

use super::events::{StreamEvent, UsageEvent};
use crate::proxy::mappers::tools::decode_tool_arguments;

fn sse_frame(v: &Value) -> Bytes {
    Bytes::from(format!(
        "data: {}\n\n",
        serde_json::to_string(v).unwrap_or_default()
    ))
}

pub fn usage_metadata_json(usage: &UsageEvent) -> Value {
    json!({
        "promptTokenCount": usage.prompt,
        "candidatesTokenCount": usage.completion,
        "totalTokenCount": usage.total,
    })
}

/// Re-serializes neutral events as Gemini `generateContent` candidate
/// chunks. The final chunk carries `finishReason` and `usageMetadata`;
/// the stream simply closes afterwards, there is no `[DONE]` marker.
pub struct GeminiStreamWriter {
    model: String,
    usage: Option<UsageEvent>,
    finished: bool,
}

impl GeminiStreamWriter {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            usage: None,
            finished: false,
        }
    }

    fn candidate_chunk(&self, parts: Vec<Value>, finish_reason: Option<&str>) -> Value {
        let mut candidate = json!({
            "content": { "role": "model", "parts": parts },
            "index": 0,
        });
        if let Some(reason) = finish_reason {
            candidate["finishReason"] = json!(reason);
        }
        let mut chunk = json!({
            "candidates": [candidate],
            "modelVersion": &self.model,
        });
        if finish_reason.is_some() {
            if let Some(usage) = &self.usage {
                chunk["usageMetadata"] = usage_metadata_json(usage);
            }
        }
        chunk
    }

    pub fn write(&mut self, event: &StreamEvent) -> Vec<Bytes> {
        match event {
            StreamEvent::Text { text } => {
                vec![sse_frame(&self.candidate_chunk(
                    vec![json!({ "text": text })],
                    None,
                ))]
            }
            StreamEvent::Reasoning { text, signature } => {
                let mut part = json!({ "text": text, "thought": true });
                if let Some(sig) = signature {
                    part["thoughtSignature"] = json!(sig);
                }
                vec![sse_frame(&self.candidate_chunk(vec![part], None))]
            }
            StreamEvent::ToolCalls { calls } => {
                let parts: Vec<Value> = calls
                    .iter()
                    .map(|call| {
                        json!({
                            "functionCall": {
                                "name": call.name,
                                "args": decode_tool_arguments(&call.args_json),
                            }
                        })
                    })
                    .collect();
                vec![sse_frame(&self.candidate_chunk(parts, None))]
            }
            StreamEvent::Usage(usage) => {
                self.usage = Some(*usage);
                Vec::new()
            }
            StreamEvent::Done { finish_reason } => {
                self.finished = true;
                vec![sse_frame(
                    &self.candidate_chunk(Vec::new(), Some(finish_reason.as_str())),
                )]
            }
        }
    }

    pub fn finish(&mut self) -> Vec<Bytes> {
        // Typed final event already closed the stream.
        Vec::new()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
