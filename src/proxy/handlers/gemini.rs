use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

use super::common::{
    call_with_retry, collect_sse_stream, drive_sse_stream, json_response, replay_events_stream,
    sse_response,
};
use super::errors::{error_response, Dialect};
use super::{classify_upstream_error, read_upstream_json};
use crate::error::ProxyError;
use crate::proxy::mappers::common::parse_candidate_parts;
use crate::proxy::mappers::gemini::{
    build_gemini_response, restore_tool_names, unwrap_gemini_response, wrap_gemini_request,
};
use crate::proxy::mappers::model_features::parse_model_features;
use crate::proxy::state::AppState;
use crate::proxy::stream::{replay_as_events, GeminiStreamWriter, SseParser};
use crate::proxy::variant::Variant;

pub async fn generate_antigravity(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    handle_generate(state, Variant::Antigravity, model_action, query, body).await
}

pub async fn generate_cli(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    handle_generate(state, Variant::GeminiCli, model_action, query, body).await
}

/// Path tail is `{model}:{action}`; streaming is the streamGenerateContent
/// action or `alt=sse` on generateContent.
async fn handle_generate(
    state: AppState,
    variant: Variant,
    model_action: String,
    query: HashMap<String, String>,
    body: Value,
) -> Response {
    let dialect = Dialect::Gemini;

    let Some((raw_model, action)) = model_action.rsplit_once(':') else {
        return error_response(
            dialect,
            &ProxyError::InvalidRequest(format!("malformed model path: {}", model_action)),
            None,
        );
    };
    let body_wants_stream = body
        .get("_isStream")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let client_stream = match action {
        "streamGenerateContent" => true,
        "generateContent" => {
            query.get("alt").map(String::as_str) == Some("sse") || body_wants_stream
        }
        other => {
            return error_response(
                dialect,
                &ProxyError::InvalidRequest(format!("unsupported action: {}", other)),
                None,
            );
        }
    };

    let (model, mut features) = parse_model_features(raw_model);
    if variant != Variant::GeminiCli {
        features.fake_stream = false;
    }
    let has_tools = body
        .get("tools")
        .and_then(Value::as_array)
        .map(|t| !t.is_empty())
        .unwrap_or(false);
    let is_image_model = model.contains("-image");

    let pool = state.pool(variant).clone();
    let Some(account) = pool.manager.get_token().await else {
        return error_response(dialect, &ProxyError::NoAvailableAccount, None);
    };
    let token_id = account.token_id(pool.manager.salt());
    let account_email = account.email.clone();
    let trace_id = format!("req_{}", uuid::Uuid::new_v4().simple());
    info!(
        "[{}] Gemini {}: {} | stream: {} | account: {}",
        trace_id,
        action,
        raw_model,
        client_stream,
        account_email.as_deref().unwrap_or("<unknown>")
    );

    let envelope = wrap_gemini_request(&body, account.project_id.as_deref(), &model, &features);

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
        (true, true) => {
            let parser = SseParser::new(&model, None, has_tools, is_image_model);
            let writer = GeminiStreamWriter::new(&model);
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
        (true, false) => {
            let json = match read_upstream_json(response).await {
                Ok(v) => v,
                Err(e) => return error_response(dialect, &e, account_email.as_deref()),
            };
            let parsed = parse_candidate_parts(&json, &model);
            let events = replay_as_events(&parsed);
            sse_response(
                replay_events_stream(events, GeminiStreamWriter::new(&model)),
                account_email.as_deref(),
            )
        }
        (false, true) => {
            let parser = SseParser::new(&model, None, has_tools, is_image_model);
            match collect_sse_stream(response, parser).await {
                Ok(collector) => {
                    let parsed = collector.into_parsed();
                    json_response(
                        build_gemini_response(&parsed, &model),
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
        (false, false) => {
            let json = match read_upstream_json(response).await {
                Ok(v) => v,
                Err(e) => return error_response(dialect, &e, account_email.as_deref()),
            };
            let mut unwrapped = unwrap_gemini_response(&json);
            restore_tool_names(&mut unwrapped, &model);
            json_response(unwrapped, account_email.as_deref())
        }
    }
}
