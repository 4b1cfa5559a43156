use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;

use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Gemini,
    Claude,
}

fn claude_error_type(status: u16) -> &'static str {
    match status {
        400 => "invalid_request_error",
        401 | 403 => "authentication_error",
        429 => "rate_limit_error",
        _ => "api_error",
    }
}

fn gemini_status_label(status: u16) -> &'static str {
    match status {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        429 => "RESOURCE_EXHAUSTED",
        503 => "UNAVAILABLE",
        _ => "INTERNAL",
    }
}

pub fn error_body(dialect: Dialect, status: u16, message: &str) -> serde_json::Value {
    match dialect {
        Dialect::OpenAi => json!({
            "error": {
                "message": message,
                "type": if status == 429 { "rate_limit_error" } else { "upstream_error" },
                "code": status,
            }
        }),
        Dialect::Gemini => json!({
            "error": {
                "code": status,
                "message": message,
                "status": gemini_status_label(status),
            }
        }),
        Dialect::Claude => json!({
            "type": "error",
            "error": {
                "type": claude_error_type(status),
                "message": message,
            }
        }),
    }
}

/// Tags a response with the serving account so operators can attribute
/// calls. Skipped when no account was acquired yet.
pub fn attach_account_email(response: &mut Response, account_email: Option<&str>) {
    if let Some(email) = account_email {
        if let Ok(value) = HeaderValue::from_str(email) {
            response.headers_mut().insert("X-Account-Email", value);
        }
    }
}

/// Error reply before any response body went out. `account_email` is the
/// account that served (or failed) the call, when one was picked.
pub fn error_response(
    dialect: Dialect,
    error: &ProxyError,
    account_email: Option<&str>,
) -> Response {
    let status = error.status_code();
    let body = error_body(dialect, status, &error.to_string());
    let mut response = (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(body),
    )
        .into_response();
    attach_account_email(&mut response, account_email);
    response
}

/// Error frame for a stream whose headers are already on the wire.
pub fn error_frame(dialect: Dialect, message: &str) -> Bytes {
    match dialect {
        Dialect::OpenAi => Bytes::from(format!(
            "data: {}\n\n",
            error_body(Dialect::OpenAi, 502, message)
        )),
        Dialect::Gemini => Bytes::from(format!(
            "data: {}\n\n",
            error_body(Dialect::Gemini, 502, message)
        )),
        Dialect::Claude => Bytes::from(format!(
            "event: error\ndata: {}\n\n",
            error_body(Dialect::Claude, 502, message)
        )),
    }
}
