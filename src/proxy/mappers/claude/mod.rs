pub mod models;
pub mod request;
pub mod response;

pub use models::{ClaudeContent, ClaudeContentBlock, ClaudeMessage, ClaudeRequest};
pub use request::transform_claude_request;
pub use response::build_claude_response;
