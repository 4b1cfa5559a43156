use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde_json::Value;
use tracing::info;

use super::common::{
    call_with_retry, collect_sse_stream, drive_sse_stream, json_response, replay_events_stream,
    sse_response,
};
use super::errors::{error_response, Dialect};
use super::{classify_upstream_error, read_upstream_json};
use crate::error::ProxyError;
use crate::proxy::mappers::common::parse_candidate_parts;
use crate::proxy::mappers::model_features::parse_model_features;
use crate::proxy::mappers::openai::{
    build_openai_response, transform_openai_request, OpenAiRequest,
};
use crate::proxy::state::AppState;
use crate::proxy::stream::{replay_as_events, OpenAiStreamWriter, SseParser};
use crate::proxy::variant::Variant;

pub async fn chat_completions_antigravity(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    handle_chat(state, Variant::Antigravity, body).await
}

pub async fn chat_completions_cli(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    handle_chat(state, Variant::GeminiCli, body).await
}

async fn handle_chat(state: AppState, variant: Variant, body: Value) -> Response {
    let dialect = Dialect::OpenAi;

    let request: OpenAiRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(dialect, &ProxyError::InvalidRequest(e.to_string()), None);
        }
    };
    if request.messages.is_empty() {
        return error_response(
            dialect,
            &ProxyError::InvalidRequest("messages must not be empty".to_string()),
            None,
        );
    }

    let (model, mut features) = parse_model_features(&request.model);
    if variant != Variant::GeminiCli {
        // Fake-stream is a CLI-surface affordance.
        features.fake_stream = false;
    }
    let has_tools = request.tools.as_ref().map(|t| !t.is_empty()).unwrap_or(false);
    let is_image_model = model.contains("-image");

    let pool = state.pool(variant).clone();
    let Some(account) = pool.manager.get_token().await else {
        return error_response(dialect, &ProxyError::NoAvailableAccount, None);
    };
    let token_id = account.token_id(pool.manager.salt());
    let account_email = account.email.clone();
    let trace_id = format!("req_{}", uuid::Uuid::new_v4().simple());
    info!(
        "[{}] OpenAI chat: {} | {} messages | stream: {} | account: {}",
        trace_id,
        request.model,
        request.messages.len(),
        request.stream,
        account_email.as_deref().unwrap_or("<unknown>")
    );

    let envelope =
        transform_openai_request(&request, account.project_id.as_deref(), &model, &features);

    let client_stream = request.stream;
    let fake_stream = features.fake_stream && client_stream;
    let upstream_stream = if fake_stream {
        false
    } else {
        client_stream || (state.config.fake_non_stream && !is_image_model)
    };

    let result = call_with_retry(state.config.retry_times, &trace_id, || {
        pool.upstream
            .generate(&account.access_token, &envelope, upstream_stream)
    })
    .await;
    let response = match result {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                dialect,
                &ProxyError::Transport(e),
                account_email.as_deref(),
            )
        }
    };

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let error =
            classify_upstream_error(&pool.manager, &token_id, status.as_u16(), &text).await;
        return error_response(dialect, &error, account_email.as_deref());
    }
    pool.manager.record_request(&token_id);

    match (client_stream, upstream_stream) {
        // Plain streaming.
        (true, true) => {
            let parser = SseParser::new(&model, None, has_tools, is_image_model);
            let writer = OpenAiStreamWriter::new(&request.model);
            sse_response(
                drive_sse_stream(
                    response,
                    parser,
                    writer,
                    state.config.heartbeat_secs,
                    dialect,
                ),
                account_email.as_deref(),
            )
        }
        // Fake stream: one-shot upstream call replayed as SSE.
        (true, false) => {
            let json = match read_upstream_json(response).await {
                Ok(v) => v,
                Err(e) => return error_response(dialect, &e, account_email.as_deref()),
            };
            let parsed = parse_candidate_parts(&json, &model);
            let events = replay_as_events(&parsed);
            sse_response(
                replay_events_stream(events, OpenAiStreamWriter::new(&request.model)),
                account_email.as_deref(),
            )
        }
        // Fake non-stream: collect the SSE body, answer with one JSON.
        (false, true) => {
            let parser = SseParser::new(&model, None, has_tools, is_image_model);
            match collect_sse_stream(response, parser).await {
                Ok(collector) => {
                    let parsed = collector.into_parsed();
                    json_response(
                        build_openai_response(&parsed, &request.model),
                        account_email.as_deref(),
                    )
                }
                Err(e) => error_response(
                    dialect,
                    &ProxyError::Transport(e),
                    account_email.as_deref(),
                ),
            }
        }
        // Plain non-stream.
        (false, false) => {
            let json = match read_upstream_json(response).await {
                Ok(v) => v,
                Err(e) => return error_response(dialect, &e, account_email.as_deref()),
            };
            let parsed = parse_candidate_parts(&json, &model);
            json_response(
                build_openai_response(&parsed, &request.model),
                account_email.as_deref(),
            )
        }
    }
}
