use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::models::AppConfig;
use crate::proxy::admin::admin_router;
use crate::proxy::handlers::common::{gemini_models_body, openai_models_body};
use crate::proxy::handlers::{claude, gemini, openai};
use crate::proxy::middleware::auth::auth_middleware;
use crate::proxy::signature_cache::SignatureCache;
use crate::proxy::state::{AppState, PoolHandle};
use crate::proxy::token::{AccountManager, TokenStore};
use crate::proxy::upstream::UpstreamClient;
use crate::proxy::variant::Variant;

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn memory_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "accounts": {
            "antigravity": state.antigravity.manager.active_len().await,
            "gemini_cli": state.gemini_cli.manager.active_len().await,
        },
    }))
}

async fn openai_models() -> impl IntoResponse {
    Json(openai_models_body())
}

async fn gemini_models() -> impl IntoResponse {
    Json(gemini_models_body())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Antigravity surface.
        .route("/v1/chat/completions", post(openai::chat_completions_antigravity))
        .route("/v1/messages", post(claude::messages_antigravity))
        .route("/v1beta/models/:model_action", post(gemini::generate_antigravity))
        .route("/v1/models", get(openai_models))
        .route("/v1beta/models", get(gemini_models))
        // Gemini CLI surface.
        .route("/cli/v1/chat/completions", post(openai::chat_completions_cli))
        .route("/cli/v1/messages", post(claude::messages_cli))
        .route("/cli/v1beta/models/:model_action", post(gemini::generate_cli))
        .route("/cli/v1/models", get(openai_models))
        .route("/cli/v1beta/models", get(gemini_models))
        // Ops.
        .route("/health", get(health))
        .route("/v1/memory", get(memory_stats))
        .merge(admin_router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Builds both pools from the data dir, runs their startup refresh, and
/// returns the assembled state.
pub async fn build_state(config: AppConfig) -> Result<AppState, String> {
    let data_dir = crate::modules::system::config::get_data_dir()?;
    let config = Arc::new(config);

    SignatureCache::global().configure(config.signature_cache.clone());

    let mut pools = Vec::with_capacity(2);
    for variant in [Variant::Antigravity, Variant::GeminiCli] {
        let upstream = Arc::new(UpstreamClient::new(variant, config.upstream_timeout_secs));
        let store = TokenStore::new(&data_dir, variant.accounts_file(), config.encrypt_accounts);
        let manager = Arc::new(AccountManager::new(
            variant,
            store,
            &config,
            upstream.clone(),
        )?);
        match manager.init().await {
            Ok(count) => {
                tracing::info!("[{}] Pool ready with {} account(s)", variant.label(), count)
            }
            Err(e) => tracing::warn!("[{}] Pool init failed: {}", variant.label(), e),
        }
        pools.push(PoolHandle { manager, upstream });
    }

    let gemini_cli = pools.pop().expect("cli pool");
    let antigravity = pools.pop().expect("antigravity pool");

    Ok(AppState {
        config,
        antigravity,
        gemini_cli,
        started_at: std::time::Instant::now(),
    })
}

pub async fn serve(state: AppState) -> Result<(), String> {
    let port = state.config.port;
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| format!("failed_to_bind_port_{}: {}", port, e))?;
    tracing::info!("Proxy listening on 0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| format!("server_error: {}", e))
}
