use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::models::Account;
use crate::proxy::state::AppState;
use crate::proxy::token::AccountPatch;
use crate::proxy::variant::Variant;

/// Admin surface over both pools. Accounts are addressed exclusively by
/// their opaque token_id; export is the only route that returns raw
/// refresh tokens.
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/:pool/tokens", get(list_tokens).post(add_token))
        .route(
            "/admin/:pool/tokens/:token_id",
            post(update_token).delete(delete_token),
        )
        .route("/admin/:pool/tokens/:token_id/refresh", post(refresh_token))
        .route(
            "/admin/:pool/tokens/:token_id/project-id",
            post(fetch_project_id),
        )
        .route("/admin/:pool/export", get(export_tokens))
        .route("/admin/:pool/import", post(import_tokens))
        .route("/admin/:pool/reload", post(reload_pool))
}

fn parse_pool(pool: &str) -> Option<Variant> {
    match pool {
        "antigravity" => Some(Variant::Antigravity),
        "gemini-cli" | "cli" => Some(Variant::GeminiCli),
        _ => None,
    }
}

fn failure(status: axum::http::StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
        .into_response()
}

fn unknown_pool(pool: &str) -> Response {
    failure(
        axum::http::StatusCode::NOT_FOUND,
        format!("unknown pool: {}", pool),
    )
}

async fn list_tokens(State(state): State<AppState>, Path(pool): Path<String>) -> Response {
    let Some(variant) = parse_pool(&pool) else {
        return unknown_pool(&pool);
    };
    let accounts = state.pool(variant).manager.list_accounts().await;
    Json(json!({ "success": true, "accounts": accounts })).into_response()
}

async fn add_token(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(variant) = parse_pool(&pool) else {
        return unknown_pool(&pool);
    };
    let account: Account = match serde_json::from_value(body) {
        Ok(account) => account,
        Err(e) => {
            return failure(
                axum::http::StatusCode::BAD_REQUEST,
                format!("invalid account: {}", e),
            )
        }
    };
    match state.pool(variant).manager.add_account(account).await {
        Ok(view) => Json(json!({ "success": true, "account": view })).into_response(),
        Err(e) => failure(axum::http::StatusCode::BAD_REQUEST, e),
    }
}

async fn update_token(
    State(state): State<AppState>,
    Path((pool, token_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let Some(variant) = parse_pool(&pool) else {
        return unknown_pool(&pool);
    };
    let patch: AccountPatch = match serde_json::from_value(body) {
        Ok(patch) => patch,
        Err(e) => {
            return failure(
                axum::http::StatusCode::BAD_REQUEST,
                format!("invalid patch: {}", e),
            )
        }
    };
    match state
        .pool(variant)
        .manager
        .update_account(&token_id, patch)
        .await
    {
        Ok(view) => Json(json!({ "success": true, "account": view })).into_response(),
        Err(e) => failure(axum::http::StatusCode::NOT_FOUND, e),
    }
}

async fn delete_token(
    State(state): State<AppState>,
    Path((pool, token_id)): Path<(String, String)>,
) -> Response {
    let Some(variant) = parse_pool(&pool) else {
        return unknown_pool(&pool);
    };
    match state.pool(variant).manager.delete_account(&token_id).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => failure(axum::http::StatusCode::NOT_FOUND, e),
    }
}

async fn refresh_token(
    State(state): State<AppState>,
    Path((pool, token_id)): Path<(String, String)>,
) -> Response {
    let Some(variant) = parse_pool(&pool) else {
        return unknown_pool(&pool);
    };
    match state.pool(variant).manager.refresh_account(&token_id).await {
        Ok(account) => {
            let view = crate::models::AccountView::from_account(
                &account,
                state.pool(variant).manager.salt(),
                state.config.refresh_buffer_ms,
            );
            Json(json!({ "success": true, "account": view })).into_response()
        }
        Err(e) => {
            let status = match e.status {
                Some(400) | Some(403) => axum::http::StatusCode::BAD_REQUEST,
                _ => axum::http::StatusCode::BAD_GATEWAY,
            };
            failure(status, e.message)
        }
    }
}

async fn fetch_project_id(
    State(state): State<AppState>,
    Path((pool, token_id)): Path<(String, String)>,
) -> Response {
    let Some(variant) = parse_pool(&pool) else {
        return unknown_pool(&pool);
    };
    match state
        .pool(variant)
        .manager
        .fetch_project_id_for_token(&token_id)
        .await
    {
        Ok(Some(project_id)) => {
            Json(json!({ "success": true, "projectId": project_id })).into_response()
        }
        Ok(None) => failure(
            axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            "account could not be onboarded",
        ),
        Err(e) => failure(axum::http::StatusCode::BAD_GATEWAY, e),
    }
}

async fn export_tokens(State(state): State<AppState>, Path(pool): Path<String>) -> Response {
    let Some(variant) = parse_pool(&pool) else {
        return unknown_pool(&pool);
    };
    match state.pool(variant).manager.export_accounts() {
        Ok(accounts) => Json(json!({ "success": true, "accounts": accounts })).into_response(),
        Err(e) => failure(axum::http::StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn import_tokens(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(variant) = parse_pool(&pool) else {
        return unknown_pool(&pool);
    };
    let accounts: Vec<Account> = match serde_json::from_value(body) {
        Ok(accounts) => accounts,
        Err(e) => {
            return failure(
                axum::http::StatusCode::BAD_REQUEST,
                format!("invalid account list: {}", e),
            )
        }
    };
    match state.pool(variant).manager.import_accounts(accounts).await {
        Ok(count) => Json(json!({ "success": true, "imported": count })).into_response(),
        Err(e) => failure(axum::http::StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn reload_pool(State(state): State<AppState>, Path(pool): Path<String>) -> Response {
    let Some(variant) = parse_pool(&pool) else {
        return unknown_pool(&pool);
    };
    match state.pool(variant).manager.reload().await {
        Ok(count) => Json(json!({ "success": true, "active": count })).into_response(),
        Err(e) => failure(axum::http::StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
