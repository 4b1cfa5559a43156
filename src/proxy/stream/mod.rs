pub mod claude;
pub mod collect;
pub mod events;
pub mod gemini;
pub mod line_buffer;
pub mod openai;
pub mod parser;

pub use claude::ClaudeStreamWriter;
pub use collect::{replay_as_events, StreamCollector};
pub use events::{StreamEvent, ToolCallEvent, UsageEvent};
pub use gemini::GeminiStreamWriter;
pub use line_buffer::LineBuffer;
pub use openai::OpenAiStreamWriter;
pub use parser::SseParser;

use bytes::Bytes;

/// Common surface of the three dialect writers so the handler's stream
/// driver stays dialect-agnostic.
pub trait EventWriter: Send + 'static {
    fn write(&mut self, event: &StreamEvent) -> Vec<Bytes>;
    fn finish(&mut self) -> Vec<Bytes>;
}

impl EventWriter for OpenAiStreamWriter {
    fn write(&mut self, event: &StreamEvent) -> Vec<Bytes> {
        OpenAiStreamWriter::write(self, event)
    }
    fn finish(&mut self) -> Vec<Bytes> {
        OpenAiStreamWriter::finish(self)
    }
}

impl EventWriter for GeminiStreamWriter {
    fn write(&mut self, event: &StreamEvent) -> Vec<Bytes> {
        GeminiStreamWriter::write(self, event)
    }
    fn finish(&mut self) -> Vec<Bytes> {
        GeminiStreamWriter::finish(self)
    }
}

impl EventWriter for ClaudeStreamWriter {
    fn write(&mut self, event: &StreamEvent) -> Vec<Bytes> {
        ClaudeStreamWriter::write(self, event)
    }
    fn finish(&mut self) -> Vec<Bytes> {
        ClaudeStreamWriter::finish(self)
    }
}
