use thiserror::Error;

/// Raised by the OAuth refresh path. `status` is the upstream HTTP status
/// when one was received; transport failures carry `None`.
#[derive(Error, Debug, Clone)]
#[error("token refresh failed for {token_id}: {message}")]
pub struct TokenError {
    pub message: String,
    pub token_id: String,
    pub status: Option<u16>,
}

impl TokenError {
    pub fn new(
        message: impl Into<String>,
        token_id: impl Into<String>,
        status: Option<u16>,
    ) -> Self {
        Self {
            message: message.into(),
            token_id: token_id.into(),
            status,
        }
    }

    /// 400/403 on refresh means the grant itself is dead and the account
    /// must be disabled rather than retried.
    pub fn kills_account(&self) -> bool {
        matches!(self.status, Some(400) | Some(403))
    }
}

/// Request-pipeline errors, classified the way the handlers need them.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing or invalid API key")]
    AuthRequired,

    #[error("no available account")]
    NoAvailableAccount,

    #[error("upstream permission denied: {0}")]
    UpstreamPermissionDenied(String),

    #[error("upstream token invalid: {0}")]
    UpstreamTokenInvalid(String),

    #[error("upstream rate limit: {0}")]
    UpstreamRateLimit(String),

    #[error("upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error(transparent)]
    TokenRefresh(#[from] TokenError),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ProxyError {
    /// Classify a non-2xx upstream chat response. The `"The caller does not"`
    /// 403 is a context-overflow symptom and must not kill the account.
    pub fn from_upstream(status: u16, body: &str) -> Self {
        match status {
            403 if body.contains("The caller does not") => {
                ProxyError::UpstreamPermissionDenied(body.to_string())
            }
            403 => ProxyError::UpstreamTokenInvalid(body.to_string()),
            429 => ProxyError::UpstreamRateLimit(body.to_string()),
            _ => ProxyError::Upstream {
                status,
                message: body.to_string(),
            },
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::InvalidRequest(_) => 400,
            ProxyError::AuthRequired => 401,
            ProxyError::NoAvailableAccount => 503,
            ProxyError::UpstreamPermissionDenied(_) => 400,
            ProxyError::UpstreamTokenInvalid(_) => 403,
            ProxyError::UpstreamRateLimit(_) => 429,
            ProxyError::Upstream { status, .. } => *status,
            ProxyError::TokenRefresh(_) => 502,
            ProxyError::Transport(_) => 502,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProxyError::UpstreamRateLimit(_))
    }
}
