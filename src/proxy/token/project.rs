use serde_json::{json, Value};
use tokio::time::Duration;

use crate::constants::{ONBOARD_MAX_ATTEMPTS, ONBOARD_POLL_INTERVAL_SECS};
use crate::proxy::upstream::UpstreamClient;
use crate::proxy::variant::Variant;

fn ide_type(variant: Variant) -> &'static str {
    match variant {
        Variant::Antigravity => "ANTIGRAVITY",
        Variant::GeminiCli => "IDE_UNSPECIFIED",
    }
}

/// One-shot project-id bootstrap: `loadCodeAssist` first; accounts already
/// carrying a tier answer directly, everyone else goes through the
/// `onboardUser` long-running operation. `Ok(None)` means the account
/// cannot be onboarded and the caller should disable it.
pub async fn fetch_project_id(
    upstream: &UpstreamClient,
    access_token: &str,
) -> Result<Option<String>, String> {
    fetch_project_id_with_interval(
        upstream,
        access_token,
        Duration::from_secs(ONBOARD_POLL_INTERVAL_SECS),
    )
    .await
}

pub(crate) async fn fetch_project_id_with_interval(
    upstream: &UpstreamClient,
    access_token: &str,
    poll_interval: Duration,
) -> Result<Option<String>, String> {
    let load_body = json!({
        "metadata": { "ideType": ide_type(upstream.variant()) }
    });
    let response = upstream
        .call("loadCodeAssist", access_token, &load_body, None)
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("loadCodeAssist returned {}: {}", status, body));
    }
    let load: Value = response
        .json()
        .await
        .map_err(|e| format!("loadCodeAssist parse failed: {}", e))?;

    if load.get("currentTier").is_some() {
        return Ok(load
            .get("cloudaicompanionProject")
            .and_then(Value::as_str)
            .map(str::to_string));
    }

    let tier_id = load
        .get("allowedTiers")
        .and_then(Value::as_array)
        .and_then(|tiers| {
            tiers
                .iter()
                .find(|t| t.get("isDefault").and_then(Value::as_bool).unwrap_or(false))
        })
        .and_then(|t| t.get("id"))
        .and_then(Value::as_str)
        .unwrap_or("free-tier")
        .to_string();

    let onboard_body = json!({
        "tierId": tier_id,
        "metadata": { "ideType": ide_type(upstream.variant()) },
    });

    for attempt in 0..ONBOARD_MAX_ATTEMPTS {
        let response = upstream
            .call("onboardUser", access_token, &onboard_body, None)
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("onboardUser returned {}: {}", status, body));
        }
        let operation: Value = response
            .json()
            .await
            .map_err(|e| format!("onboardUser parse failed: {}", e))?;

        if operation.get("done").and_then(Value::as_bool).unwrap_or(false) {
            let project = operation
                .get("response")
                .and_then(|r| r.get("cloudaicompanionProject"));
            let id = match project {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Object(obj)) => obj
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            };
            return Ok(id);
        }

        tracing::debug!(
            "onboardUser not done yet (attempt {}/{})",
            attempt + 1,
            ONBOARD_MAX_ATTEMPTS
        );
        tokio::time::sleep(poll_interval).await;
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::{IntoResponse, Response};
    use axum::{extract::State, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[derive(Clone)]
    struct OnboardState {
        onboard_calls: Arc<AtomicUsize>,
        done_after: usize,
        has_current_tier: bool,
    }

    async fn load_code_assist(State(state): State<OnboardState>) -> Json<Value> {
        if state.has_current_tier {
            Json(json!({
                "currentTier": { "id": "free-tier" },
                "cloudaicompanionProject": "proj-direct"
            }))
        } else {
            Json(json!({
                "allowedTiers": [
                    { "id": "legacy-tier", "isDefault": false },
                    { "id": "free-tier", "isDefault": true }
                ]
            }))
        }
    }

    async fn onboard_user(State(state): State<OnboardState>) -> Json<Value> {
        let n = state.onboard_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= state.done_after {
            Json(json!({
                "done": true,
                "response": { "cloudaicompanionProject": "proj-42" }
            }))
        } else {
            Json(json!({ "done": false }))
        }
    }

    // `path:method` URLs collide with the router's param syntax, so the
    // mock dispatches from a fallback.
    async fn mock_dispatch(
        State(state): State<OnboardState>,
        request: axum::extract::Request,
    ) -> Response {
        let path = request.uri().path().to_string();
        if path.ends_with(":loadCodeAssist") {
            load_code_assist(State(state)).await.into_response()
        } else if path.ends_with(":onboardUser") {
            onboard_user(State(state)).await.into_response()
        } else {
            axum::http::StatusCode::NOT_FOUND.into_response()
        }
    }

    async fn start_mock(state: OnboardState) -> (UpstreamClient, tokio::task::JoinHandle<()>) {
        let app = Router::new().fallback(mock_dispatch).with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (
            UpstreamClient::new_for_test(
                Variant::Antigravity,
                &format!("http://{}/v1internal", addr),
            ),
            server,
        )
    }

    #[tokio::test]
    async fn current_tier_short_circuits() {
        let (client, server) = start_mock(OnboardState {
            onboard_calls: Arc::new(AtomicUsize::new(0)),
            done_after: 1,
            has_current_tier: true,
        })
        .await;
        let project = fetch_project_id_with_interval(&client, "t", Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(project.as_deref(), Some("proj-direct"));
        server.abort();
    }

    #[tokio::test]
    async fn onboarding_polls_until_done() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (client, server) = start_mock(OnboardState {
            onboard_calls: calls.clone(),
            done_after: 3,
            has_current_tier: false,
        })
        .await;
        let project = fetch_project_id_with_interval(&client, "t", Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(project.as_deref(), Some("proj-42"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        server.abort();
    }

    #[tokio::test]
    async fn never_done_returns_none() {
        let (client, server) = start_mock(OnboardState {
            onboard_calls: Arc::new(AtomicUsize::new(0)),
            done_after: usize::MAX,
            has_current_tier: false,
        })
        .await;
        let project = fetch_project_id_with_interval(&client, "t", Duration::from_millis(2))
            .await
            .unwrap();
        assert_eq!(project, None);
        server.abort();
    }

    #[tokio::test]
    async fn object_shaped_project_id_is_extracted() {
        let app = Router::new().fallback(|request: axum::extract::Request| async move {
            if request.uri().path().ends_with(":loadCodeAssist") {
                Json(json!({ "allowedTiers": [] }))
            } else {
                Json(json!({
                    "done": true,
                    "response": { "cloudaicompanionProject": { "id": "proj-obj" } }
                }))
            }
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        let client = UpstreamClient::new_for_test(
            Variant::Antigravity,
            &format!("http://{}/v1internal", addr),
        );

        let project = fetch_project_id_with_interval(&client, "t", Duration::from_millis(2))
            .await
            .unwrap();
        assert_eq!(project.as_deref(), Some("proj-obj"));
        server.abort();
    }
}
