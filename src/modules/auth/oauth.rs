use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OAuth client credentials plus scope set for one upstream variant.
#[derive(Debug, Clone, Copy)]
pub struct OauthCredentials {
    pub client_id: &'static str,
    pub client_secret: &'static str,
    pub scopes: &'static [&'static str],
}

pub const ANTIGRAVITY_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/cclog",
    "https://www.googleapis.com/auth/experimentsandconfigs",
];

pub const GEMINI_CLI_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Refresh failure before token-id attribution. The manager wraps this
/// into a `TokenError` once it knows which account was involved.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RefreshError {
    pub status: Option<u16>,
    pub message: String,
}

pub async fn refresh_access_token(
    client: &reqwest::Client,
    token_url: &str,
    credentials: &OauthCredentials,
    refresh_token: &str,
) -> Result<TokenResponse, RefreshError> {
    let params: Vec<(&str, &str)> = vec![
        ("client_id", credentials.client_id),
        ("client_secret", credentials.client_secret),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];

    let response = client
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| RefreshError {
            status: None,
            message: if e.is_connect() || e.is_timeout() {
                format!(
                    "Refresh request failed: {}. Unable to reach the Google authorization server.",
                    e
                )
            } else {
                format!("Refresh request failed: {}", e)
            },
        })?;

    let status = response.status();
    if status.is_success() {
        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RefreshError {
                status: None,
                message: format!("Refresh data parsing failed: {}", e),
            })?;
        tracing::debug!(
            "Token refreshed successfully, expires in {} seconds",
            token.expires_in
        );
        Ok(token)
    } else {
        let error_text = response.text().await.unwrap_or_default();
        Err(RefreshError {
            status: Some(status.as_u16()),
            message: format!("Refresh failed ({}): {}", status, error_text),
        })
    }
}
