use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::proxy::state::AppState;

fn constant_time_str_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let max_len = left_bytes.len().max(right_bytes.len());
    let mut diff = left_bytes.len() ^ right_bytes.len();

    for i in 0..max_len {
        let l = left_bytes.get(i).copied().unwrap_or(0);
        let r = right_bytes.get(i).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }

    diff == 0
}

/// Pulls the caller's key from `Authorization: Bearer`, `x-api-key`,
/// `x-goog-api-key`, or a `?key=` query parameter (Gemini dialect).
fn extract_api_key(request: &Request) -> Option<String> {
    if let Some(value) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        return Some(
            value
                .strip_prefix("Bearer ")
                .unwrap_or(value)
                .trim()
                .to_string(),
        );
    }
    for header_name in ["x-api-key", "x-goog-api-key"] {
        if let Some(value) = request
            .headers()
            .get(header_name)
            .and_then(|h| h.to_str().ok())
        {
            return Some(value.trim().to_string());
        }
    }
    request.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("key=")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    })
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path();
    if path == "/health" || request.method() == axum::http::Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let expected = state.config.api_key.as_str();
    if expected.is_empty() {
        tracing::error!("API key is empty; denying request to {}", path);
        return Err(StatusCode::UNAUTHORIZED);
    }

    match extract_api_key(&request) {
        Some(provided) if constant_time_str_eq(&provided, expected) => {
            Ok(next.run(request).await)
        }
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
