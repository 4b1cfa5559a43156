use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::time::Duration;

use crate::proxy::variant::Variant;

/// Thin wrapper over reqwest for the v1internal surface. Holds the
/// variant's endpoint list and spoofed identity headers; the Antigravity
/// variant falls through to its sandbox host on 429/404/5xx.
pub struct UpstreamClient {
    client: Client,
    variant: Variant,
    base_urls: Vec<String>,
    /// Applied to one-shot calls only. Stream reads are never timed out
    /// once headers arrive; the heartbeat is the liveness mechanism.
    oneshot_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(variant: Variant, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .expect("Failed to create upstream HTTP client");

        Self {
            client,
            variant,
            base_urls: variant.base_urls().iter().map(|s| s.to_string()).collect(),
            oneshot_timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    #[cfg(test)]
    pub fn new_for_test(variant: Variant, base_url: &str) -> Self {
        let mut this = Self::new(variant, 600);
        this.base_urls = vec![base_url.to_string()];
        this
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    fn build_url(base_url: &str, method: &str, query_string: Option<&str>) -> String {
        if let Some(qs) = query_string {
            format!("{}:{}?{}", base_url, method, qs)
        } else {
            format!("{}:{}", base_url, method)
        }
    }

    fn should_try_next_endpoint(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::NOT_FOUND
            || status.is_server_error()
    }

    /// POST one v1internal method. A non-2xx response is returned to the
    /// caller for classification, not turned into an error here.
    pub async fn call(
        &self,
        method: &str,
        access_token: &str,
        body: &Value,
        query_string: Option<&str>,
    ) -> Result<Response, String> {
        let is_stream = method.starts_with("stream");
        let mut last_err: Option<String> = None;
        for (idx, base_url) in self.base_urls.iter().enumerate() {
            let url = Self::build_url(base_url, method, query_string);
            let has_next = idx + 1 < self.base_urls.len();

            let mut request = self
                .client
                .post(&url)
                .bearer_auth(access_token)
                .header("Content-Type", "application/json")
                .header("Accept-Encoding", "gzip")
                .header("User-Agent", self.variant.user_agent())
                .json(body);
            if !is_stream {
                request = request.timeout(self.oneshot_timeout);
            }
            let response = request.send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        if idx > 0 {
                            tracing::info!(
                                "Upstream fallback succeeded on {} ({})",
                                base_url,
                                status
                            );
                        }
                        return Ok(resp);
                    }
                    if has_next && Self::should_try_next_endpoint(status) {
                        tracing::warn!(
                            "Upstream {} returned {} for {}, trying next endpoint",
                            base_url,
                            status,
                            method
                        );
                        last_err = Some(format!("Upstream {} returned {}", base_url, status));
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    let msg = format!("HTTP request failed at {}: {}", base_url, e);
                    tracing::debug!("{}", msg);
                    last_err = Some(msg);
                    if !has_next {
                        break;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| "All endpoints failed".to_string()))
    }

    /// Chat entry point: `streamGenerateContent?alt=sse` when streaming,
    /// `generateContent` otherwise.
    pub async fn generate(
        &self,
        access_token: &str,
        body: &Value,
        stream: bool,
    ) -> Result<Response, String> {
        if stream {
            self.call("streamGenerateContent", access_token, body, Some("alt=sse"))
                .await
        } else {
            self.call("generateContent", access_token, body, None).await
        }
    }
}
