use super::events::{StreamEvent, ToolCallEvent, UsageEvent};
use crate::proxy::mappers::common::{ParsedParts, ParsedToolCall, ParsedUsage};
use crate::proxy::mappers::tools::decode_tool_arguments;

/// Accumulates a neutral event stream into the fields a non-stream body
/// needs. This is the heart of fake-non-stream mode: drive the streaming
/// path, absorb everything, answer with one JSON document.
#[derive(Debug, Default)]
pub struct StreamCollector {
    pub content: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCallEvent>,
    pub usage: Option<UsageEvent>,
    pub finish_reason: Option<String>,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Text { text } => self.content.push_str(text),
            StreamEvent::Reasoning { text, .. } => self.reasoning.push_str(text),
            StreamEvent::ToolCalls { calls } => self.tool_calls.extend(calls.iter().cloned()),
            StreamEvent::Usage(usage) => self.usage = Some(*usage),
            StreamEvent::Done { finish_reason } => {
                self.finish_reason = Some(finish_reason.clone())
            }
        }
    }

    pub fn into_parsed(self) -> ParsedParts {
        ParsedParts {
            content: self.content,
            reasoning: self.reasoning,
            reasoning_signature: None,
            tool_calls: self
                .tool_calls
                .into_iter()
                .map(|call| ParsedToolCall {
                    id: call.id,
                    name: call.name,
                    args: decode_tool_arguments(&call.args_json),
                    signature: call.signature,
                })
                .collect(),
            finish_reason: self.finish_reason,
            usage: self.usage.map(|u| ParsedUsage {
                prompt_tokens: u.prompt,
                completion_tokens: u.completion,
                total_tokens: u.total,
            }),
        }
    }
}

/// The inverse direction: turn a parsed non-stream response back into a
/// neutral event sequence so a dialect writer can replay it as SSE.
/// This drives fake-stream mode for the CLI surface.
pub fn replay_as_events(parsed: &ParsedParts) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if !parsed.reasoning.is_empty() {
        events.push(StreamEvent::Reasoning {
            text: parsed.reasoning.clone(),
            signature: parsed.reasoning_signature.clone(),
        });
    }
    if !parsed.content.is_empty() {
        events.push(StreamEvent::Text {
            text: parsed.content.clone(),
        });
    }
    if !parsed.tool_calls.is_empty() {
        events.push(StreamEvent::ToolCalls {
            calls: parsed
                .tool_calls
                .iter()
                .map(|call| ToolCallEvent {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args_json: serde_json::to_string(&call.args)
                        .unwrap_or_else(|_| "{}".to_string()),
                    signature: call.signature.clone(),
                })
                .collect(),
        });
    }
    if let Some(usage) = &parsed.usage {
        events.push(StreamEvent::Usage(UsageEvent {
            prompt: usage.prompt_tokens,
            completion: usage.completion_tokens,
            total: usage.total_tokens,
        }));
    }
    events.push(StreamEvent::Done {
        finish_reason: parsed
            .finish_reason
            .clone()
            .unwrap_or_else(|| "STOP".to_string()),
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::stream::parser::SseParser;
    use serde_json::json;

    // Property: for a transcript ending in finishReason, the collector
    // holds exactly the concatenation of Text events, Reasoning events,
    // and the full buffered tool-call list.
    #[test]
    fn stream_to_non_stream_equivalence() {
        let mut parser = SseParser::new("gemini-2.5-pro", None, true, false);
        let mut collector = StreamCollector::new();

        let frames = [
            json!({"candidates": [{"content": {"parts": [
                {"text": "step one ", "thought": true}
            ]}}]}),
            json!({"candidates": [{"content": {"parts": [
                {"text": "step two", "thought": true},
                {"text": "Hello "}
            ]}}]}),
            json!({"candidates": [{"content": {"parts": [
                {"text": "world"},
                {"functionCall": {"name": "get_weather", "args": {"city": "BJ"}}}
            ]}}]}),
            json!({
                "candidates": [{"finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 11, "candidatesTokenCount": 6, "totalTokenCount": 17}
            }),
        ];

        for frame in &frames {
            for event in parser.push_line(&format!("data: {}", frame)) {
                collector.absorb(&event);
            }
        }

        assert_eq!(collector.content, "Hello world");
        assert_eq!(collector.reasoning, "step one step two");
        assert_eq!(collector.tool_calls.len(), 1);
        assert_eq!(collector.tool_calls[0].name, "get_weather");
        assert_eq!(collector.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(collector.usage.unwrap().total, 17);
    }

    #[test]
    fn missing_usage_collects_as_none() {
        let mut parser = SseParser::new("m", None, false, false);
        let mut collector = StreamCollector::new();
        for event in parser.push_line(&format!(
            "data: {}",
            json!({"candidates": [{"content": {"parts": [{"text": "x"}]}, "finishReason": "STOP"}]})
        )) {
            collector.absorb(&event);
        }
        assert!(collector.usage.is_none());
        let parsed = collector.into_parsed();
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn replay_round_trips_through_collector() {
        let parsed = ParsedParts {
            content: "answer".into(),
            reasoning: "thought".into(),
            reasoning_signature: None,
            tool_calls: vec![ParsedToolCall {
                id: "call_1".into(),
                name: "f".into(),
                args: json!({"a": 1}),
                signature: None,
            }],
            finish_reason: Some("STOP".into()),
            usage: Some(ParsedUsage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            }),
        };

        let events = replay_as_events(&parsed);
        let mut collector = StreamCollector::new();
        for event in &events {
            collector.absorb(event);
        }
        let back = collector.into_parsed();
        assert_eq!(back.content, parsed.content);
        assert_eq!(back.reasoning, parsed.reasoning);
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.tool_calls[0].args, json!({"a": 1}));
        assert_eq!(back.finish_reason, parsed.finish_reason);
        assert_eq!(back.usage.as_ref().unwrap().total_tokens, 3);
    }

    #[test]
    fn replay_of_empty_response_still_closes() {
        let events = replay_as_events(&ParsedParts::default());
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Done { finish_reason } if finish_reason == "STOP"));
    }
}
