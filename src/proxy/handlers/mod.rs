pub mod claude;
pub mod common;
pub mod errors;
pub mod gemini;
pub mod openai;

use std::sync::Arc;

use crate::error::ProxyError;
use crate::proxy::token::AccountManager;

/// Classifies a non-2xx upstream chat response and applies the account
/// consequences: a token-invalid 403 kills the account, a 429 moves the
/// rotation cursor. The permission-denied 403 (context overflow) touches
/// nothing.
pub async fn classify_upstream_error(
    manager: &Arc<AccountManager>,
    token_id: &str,
    status: u16,
    body: &str,
) -> ProxyError {
    let error = ProxyError::from_upstream(status, body);
    match &error {
        ProxyError::UpstreamTokenInvalid(_) => {
            tracing::warn!("Upstream 403 invalidated token {}, disabling", token_id);
            manager.disable_account(token_id).await;
        }
        ProxyError::UpstreamRateLimit(_) => {
            manager.report_quota_exhausted(token_id).await;
        }
        _ => {}
    }
    error
}

pub async fn read_upstream_json(response: reqwest::Response) -> Result<serde_json::Value, ProxyError> {
    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| ProxyError::Transport(format!("upstream response parse failed: {}", e)))
}
