/// One buffered tool invocation, name already resolved back to what the
/// client originally registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEvent {
    pub id: String,
    pub name: String,
    pub args_json: String,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageEvent {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

/// Dialect-neutral stream event. The SSE parser produces these; each
/// protocol writer re-serializes them into its own wire shape.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        signature: Option<String>,
    },
    ToolCalls {
        calls: Vec<ToolCallEvent>,
    },
    Usage(UsageEvent),
    Done {
        finish_reason: String,
    },
}
