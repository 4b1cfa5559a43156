pub mod wrapper;

pub use wrapper::{
    build_gemini_response, restore_tool_names, unwrap_gemini_response, wrap_gemini_request,
};
