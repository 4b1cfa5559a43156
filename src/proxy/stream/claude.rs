use bytes::Bytes;
use serde_json::{json, Value};

use super::events::{StreamEvent, UsageEvent};
use crate::proxy::mappers::common::map_finish_reason_claude;
use crate::proxy::signature_cache::SignatureCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockType {
    None,
    Text,
    Thinking,
}

/// Claude Messages event writer. Blocks open and close as triplets of
/// `content_block_start` / `_delta` / `_stop`; at most one of
/// thinking/text is open at a time and tool_use blocks are self-contained.
pub struct ClaudeStreamWriter {
    model: String,
    block_type: BlockType,
    block_index: usize,
    message_start_sent: bool,
    message_stop_sent: bool,
    used_tool: bool,
    pending_signature: Option<String>,
    usage: Option<UsageEvent>,
}

impl ClaudeStreamWriter {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            block_type: BlockType::None,
            block_index: 0,
            message_start_sent: false,
            message_stop_sent: false,
            used_tool: false,
            pending_signature: None,
            usage: None,
        }
    }

    fn emit(&self, event_type: &str, data: Value) -> Bytes {
        Bytes::from(format!(
            "event: {}\ndata: {}\n\n",
            event_type,
            serde_json::to_string(&data).unwrap_or_default()
        ))
    }

    fn emit_delta(&self, delta: Value) -> Bytes {
        self.emit(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": delta,
            }),
        )
    }

    fn usage_json(usage: Option<&UsageEvent>) -> Value {
        let usage = usage.copied().unwrap_or_default();
        json!({
            "input_tokens": usage.prompt,
            "output_tokens": usage.completion,
        })
    }

    fn ensure_message_start(&mut self, chunks: &mut Vec<Bytes>) {
        if self.message_start_sent {
            return;
        }
        self.message_start_sent = true;
        chunks.push(self.emit(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": &self.model,
                    "stop_reason": Value::Null,
                    "stop_sequence": Value::Null,
                    "usage": { "input_tokens": 0, "output_tokens": 0 },
                }
            }),
        ));
    }

    fn start_block(&mut self, block_type: BlockType, content_block: Value) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        if self.block_type != BlockType::None {
            chunks.extend(self.end_block());
        }
        chunks.push(self.emit(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": content_block,
            }),
        ));
        self.block_type = block_type;
        chunks
    }

    fn end_block(&mut self) -> Vec<Bytes> {
        if self.block_type == BlockType::None {
            return Vec::new();
        }
        let mut chunks = Vec::new();
        if self.block_type == BlockType::Thinking {
            if let Some(signature) = self.pending_signature.take() {
                chunks.push(self.emit_delta(json!({
                    "type": "signature_delta",
                    "signature": signature,
                })));
            }
        }
        chunks.push(self.emit(
            "content_block_stop",
            json!({ "type": "content_block_stop", "index": self.block_index }),
        ));
        self.block_index += 1;
        self.block_type = BlockType::None;
        chunks
    }

    pub fn write(&mut self, event: &StreamEvent) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        self.ensure_message_start(&mut chunks);

        match event {
            StreamEvent::Reasoning { text, signature } => {
                if self.block_type != BlockType::Thinking {
                    chunks.extend(self.start_block(
                        BlockType::Thinking,
                        json!({ "type": "thinking", "thinking": "" }),
                    ));
                }
                if !text.is_empty() {
                    chunks.push(self.emit_delta(json!({
                        "type": "thinking_delta",
                        "thinking": text,
                    })));
                }
                if let Some(sig) = signature {
                    if SignatureCache::global().pass_signature_to_client() {
                        self.pending_signature = Some(sig.clone());
                    }
                }
            }
            StreamEvent::Text { text } => {
                if self.block_type != BlockType::Text {
                    chunks.extend(
                        self.start_block(BlockType::Text, json!({ "type": "text", "text": "" })),
                    );
                }
                chunks.push(self.emit_delta(json!({ "type": "text_delta", "text": text })));
            }
            StreamEvent::ToolCalls { calls } => {
                self.used_tool = true;
                chunks.extend(self.end_block());
                for call in calls {
                    let mut tool_use = json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": {},
                    });
                    if SignatureCache::global().pass_signature_to_client() {
                        if let Some(sig) = &call.signature {
                            tool_use["signature"] = json!(sig);
                        }
                    }
                    chunks.push(self.emit(
                        "content_block_start",
                        json!({
                            "type": "content_block_start",
                            "index": self.block_index,
                            "content_block": tool_use,
                        }),
                    ));
                    chunks.push(self.emit_delta(json!({
                        "type": "input_json_delta",
                        "partial_json": call.args_json,
                    })));
                    chunks.push(self.emit(
                        "content_block_stop",
                        json!({ "type": "content_block_stop", "index": self.block_index }),
                    ));
                    self.block_index += 1;
                }
            }
            StreamEvent::Usage(usage) => {
                self.usage = Some(*usage);
            }
            StreamEvent::Done { finish_reason } => {
                chunks.extend(self.end_block());
                let stop_reason = map_finish_reason_claude(finish_reason, self.used_tool);
                chunks.push(self.emit(
                    "message_delta",
                    json!({
                        "type": "message_delta",
                        "delta": { "stop_reason": stop_reason, "stop_sequence": Value::Null },
                        "usage": Self::usage_json(self.usage.as_ref()),
                    }),
                ));
                if !self.message_stop_sent {
                    self.message_stop_sent = true;
                    chunks.push(Bytes::from(
                        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
                    ));
                }
            }
        }

        chunks
    }

    /// Defensive close for streams that ended without a finishReason.
    pub fn finish(&mut self) -> Vec<Bytes> {
        if self.message_stop_sent {
            return Vec::new();
        }
        let mut chunks = Vec::new();
        self.ensure_message_start(&mut chunks);
        chunks.extend(self.end_block());
        chunks.push(self.emit(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": "end_turn", "stop_sequence": Value::Null },
                "usage": Self::usage_json(self.usage.as_ref()),
            }),
        ));
        self.message_stop_sent = true;
        chunks.push(Bytes::from(
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ));
        chunks
    }
}
