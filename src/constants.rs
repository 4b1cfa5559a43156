use std::sync::LazyLock;

/// OAuth token endpoint shared by both upstream variants.
pub const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Antigravity variant: daily prod first, sandbox as fallback.
pub const ANTIGRAVITY_BASE_URLS: [&str; 2] = [
    "https://daily-cloudcode-pa.googleapis.com/v1internal",
    "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal",
];

/// Gemini CLI variant.
pub const GEMINI_CLI_BASE_URLS: [&str; 1] = ["https://cloudcode-pa.googleapis.com/v1internal"];

pub const ANTIGRAVITY_OAUTH_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
pub const ANTIGRAVITY_OAUTH_CLIENT_SECRET: &str = "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";

pub const GEMINI_CLI_OAUTH_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
pub const GEMINI_CLI_OAUTH_CLIENT_SECRET: &str = "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";

const ANTIGRAVITY_VERSION: &str = "1.15.8";
const GEMINI_CLI_VERSION: &str = "0.8.1";

pub static ANTIGRAVITY_USER_AGENT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "antigravity/{} {}/{}",
        ANTIGRAVITY_VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
});

pub static GEMINI_CLI_USER_AGENT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "GeminiCLI/{} ({}; {})",
        GEMINI_CLI_VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
});

/// Upstream bypass for conversations whose real signature is unknown.
/// Last resort only; a cached or per-model default signature wins.
pub const SKIP_SIGNATURE_SENTINEL: &str = "skip_thought_signature_validator";

/// Per-model default thought signatures observed on fresh conversations.
/// Consulted after the signature cache, before the sentinel.
pub const DEFAULT_MODEL_SIGNATURES: [(&str, &str); 2] = [
    (
        "gemini-2.5-pro",
        "CpcBAcu98PDG4usaEYNJkNYE8aGKDk1DTlXAIYsMpS3wDjPIxc5kTCZZ",
    ),
    (
        "gemini-2.5-flash",
        "CpYBAcu98PAIXhRm1GU1GQwyL9r8hTMbOc1VdTUeIilxkRKilTavGybp",
    ),
];

/// Maximum onboardUser polls before project-id bootstrap gives up.
pub const ONBOARD_MAX_ATTEMPTS: usize = 5;
pub const ONBOARD_POLL_INTERVAL_SECS: u64 = 2;

pub fn default_signature_for_model(model: &str) -> Option<&'static str> {
    DEFAULT_MODEL_SIGNATURES
        .iter()
        .find(|(m, _)| model.starts_with(m))
        .map(|(_, sig)| *sig)
}
