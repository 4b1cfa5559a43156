pub mod models;
pub mod request;
pub mod response;

pub use models::{OpenAiContent, OpenAiContentBlock, OpenAiMessage, OpenAiRequest};
pub use request::transform_openai_request;
pub use response::build_openai_response;
