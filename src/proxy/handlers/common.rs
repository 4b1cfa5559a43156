use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use tokio::time::Duration;

use super::errors::{attach_account_email, error_frame, Dialect};
use crate::proxy::stream::{EventWriter, LineBuffer, SseParser, StreamCollector, StreamEvent};

pub type SseBody = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

/// 429-aware retry around one upstream call. Only 429 retries, bounded by
/// `retry_times`, always with the same token; rotating to another account
/// between attempts is the caller's business.
pub async fn call_with_retry<F, Fut>(
    retry_times: usize,
    trace_id: &str,
    mut call: F,
) -> Result<reqwest::Response, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, String>>,
{
    let mut attempt = 0usize;
    loop {
        let response = call().await?;
        if response.status().as_u16() == 429 && attempt < retry_times {
            attempt += 1;
            tracing::warn!(
                "[{}] Upstream 429, retrying {}/{}",
                trace_id,
                attempt,
                retry_times
            );
            tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            continue;
        }
        return Ok(response);
    }
}

/// SSE response with the headers intermediaries respect, tagged with the
/// serving account.
pub fn sse_response(body: SseBody, account_email: Option<&str>) -> Response {
    let mut response = Response::builder()
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    attach_account_email(&mut response, account_email);
    response
}

/// Non-stream JSON reply tagged with the serving account.
pub fn json_response(body: Value, account_email: Option<&str>) -> Response {
    let mut response = axum::Json(body).into_response();
    attach_account_email(&mut response, account_email);
    response
}

/// Pumps an upstream SSE body through the line buffer, the neutral-event
/// parser and a dialect writer, with a heartbeat comment while idle.
/// Dropping the returned stream (client disconnect) drops the upstream
/// response, aborting the read.
pub fn drive_sse_stream<W: EventWriter>(
    upstream: reqwest::Response,
    mut parser: SseParser,
    mut writer: W,
    heartbeat_secs: u64,
    dialect: Dialect,
) -> SseBody {
    Box::pin(async_stream::stream! {
        let mut byte_stream = upstream.bytes_stream();
        let mut buffer = LineBuffer::new();
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(heartbeat_secs.max(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                item = byte_stream.next() => {
                    match item {
                        Some(Ok(bytes)) => {
                            for line in buffer.append(&bytes) {
                                for event in parser.push_line(&line) {
                                    for chunk in writer.write(&event) {
                                        yield Ok(chunk);
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            // Headers are long gone; a dialect-shaped error
                            // frame is all that can still be said.
                            tracing::error!("Upstream stream error: {}", e);
                            yield Ok(error_frame(dialect, &e.to_string()));
                            break;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok::<Bytes, String>(Bytes::from(": heartbeat\n\n"));
                }
            }
        }

        if let Some(tail) = buffer.remainder() {
            for event in parser.push_line(&tail) {
                for chunk in writer.write(&event) {
                    yield Ok(chunk);
                }
            }
        }
        for chunk in writer.finish() {
            yield Ok(chunk);
        }
    })
}

/// Fake-non-stream support: drain the upstream SSE body into a collector.
pub async fn collect_sse_stream(
    upstream: reqwest::Response,
    mut parser: SseParser,
) -> Result<StreamCollector, String> {
    let mut byte_stream = upstream.bytes_stream();
    let mut buffer = LineBuffer::new();
    let mut collector = StreamCollector::new();

    while let Some(item) = byte_stream.next().await {
        let bytes = item.map_err(|e| format!("Upstream stream error: {}", e))?;
        for line in buffer.append(&bytes) {
            for event in parser.push_line(&line) {
                collector.absorb(&event);
            }
        }
    }
    if let Some(tail) = buffer.remainder() {
        for event in parser.push_line(&tail) {
            collector.absorb(&event);
        }
    }
    Ok(collector)
}

/// Fake-stream support: replay pre-collected events through a writer as
/// if they had streamed in.
pub fn replay_events_stream<W: EventWriter>(events: Vec<StreamEvent>, mut writer: W) -> SseBody {
    Box::pin(async_stream::stream! {
        for event in events {
            for chunk in writer.write(&event) {
                yield Ok::<Bytes, String>(chunk);
            }
        }
        for chunk in writer.finish() {
            yield Ok(chunk);
        }
    })
}

pub fn openai_models_body() -> Value {
    let data: Vec<Value> = known_models()
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": 1706745600,
                "owned_by": "google",
            })
        })
        .collect();
    json!({ "object": "list", "data": data })
}

pub fn gemini_models_body() -> Value {
    let models: Vec<Value> = known_models()
        .iter()
        .map(|id| {
            json!({
                "name": format!("models/{}", id),
                "displayName": id,
                "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
            })
        })
        .collect();
    json!({ "models": models })
}

pub fn known_models() -> &'static [&'static str] {
    &[
        "gemini-2.5-pro",
        "gemini-2.5-flash",
        "gemini-2.5-pro-maxthinking",
        "gemini-2.5-pro-nothinking",
        "gemini-2.5-pro-search",
        "gemini-2.5-flash-maxthinking",
        "gemini-2.5-flash-nothinking",
        "gemini-2.5-flash-search",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn mock_response(status: u16) -> reqwest::Response {
        // http crate responses convert into reqwest ones for tests.
        let response = axum::http::Response::builder()
            .status(status)
            .body("retry-test")
            .unwrap();
        reqwest::Response::from(response)
    }

    #[tokio::test]
    async fn retry_helper_retries_only_429() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_ref = calls.clone();
        let response = call_with_retry(2, "t", move || {
            let calls = calls_ref.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(mock_response(if n < 2 { 429 } else { 200 }).await)
            }
        })
        .await
        .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_helper_gives_up_after_bound() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_ref = calls.clone();
        let response = call_with_retry(2, "t", move || {
            let calls = calls_ref.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(mock_response(429).await)
            }
        })
        .await
        .unwrap();
        assert_eq!(response.status().as_u16(), 429);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_helper_does_not_retry_other_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_ref = calls.clone();
        let response = call_with_retry(5, "t", move || {
            let calls = calls_ref.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(mock_response(500).await)
            }
        })
        .await
        .unwrap();
        assert_eq!(response.status().as_u16(), 500);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn model_lists_cover_both_dialects() {
        let openai = openai_models_body();
        assert_eq!(openai["object"], "list");
        assert!(openai["data"].as_array().unwrap().len() >= 2);

        let gemini = gemini_models_body();
        let first = &gemini["models"][0]["name"];
        assert!(first.as_str().unwrap().starts_with("models/"));
    }
}
