use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    RoundRobin,
    RequestCount,
    QuotaExhausted,
}

impl Default for RotationStrategy {
    fn default() -> Self {
        RotationStrategy::RoundRobin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default)]
    pub strategy: RotationStrategy,
    /// Requests per account under the `request_count` strategy.
    #[serde(default = "default_request_count")]
    pub request_count: u64,
}

fn default_request_count() -> u64 {
    10
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::default(),
            request_count: default_request_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureCacheConfig {
    #[serde(default)]
    pub cache_all_signatures: bool,
    #[serde(default = "default_true")]
    pub cache_tool_signatures: bool,
    #[serde(default)]
    pub cache_image_signatures: bool,
    #[serde(default = "default_true")]
    pub cache_thinking: bool,
    /// Echo thinking signatures back to Claude-dialect clients.
    #[serde(default)]
    pub pass_signature_to_client: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SignatureCacheConfig {
    fn default() -> Self {
        Self {
            cache_all_signatures: false,
            cache_tool_signatures: true,
            cache_image_signatures: false,
            cache_thinking: true,
            pass_signature_to_client: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub rotation: RotationConfig,
    /// Upper bound on 429 retries per upstream call.
    #[serde(default = "default_retry_times")]
    pub retry_times: usize,
    /// Collect the upstream stream and answer with a single JSON body.
    #[serde(default)]
    pub fake_non_stream: bool,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Upstream connect+read timeout for one-shot calls, seconds.
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    /// Refresh this long before actual access-token expiry, milliseconds.
    #[serde(default = "default_refresh_buffer_ms")]
    pub refresh_buffer_ms: i64,
    /// Encrypt token fields inside the account stores.
    #[serde(default)]
    pub encrypt_accounts: bool,
    #[serde(default)]
    pub signature_cache: SignatureCacheConfig,
}

fn default_port() -> u16 {
    8788
}

fn default_retry_times() -> usize {
    3
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_upstream_timeout_secs() -> u64 {
    60
}

fn default_refresh_buffer_ms() -> i64 {
    5 * 60 * 1000
}

impl Default for AppConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("empty config must deserialize")
    }
}

fn parse_env_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_strategy(value: &str) -> Option<RotationStrategy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "round_robin" => Some(RotationStrategy::RoundRobin),
        "request_count" => Some(RotationStrategy::RequestCount),
        "quota_exhausted" => Some(RotationStrategy::QuotaExhausted),
        _ => None,
    }
}

/// Environment wins over config.json. Invalid values are ignored with a
/// warning so a bad deployment variable cannot take the proxy down.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(key) = std::env::var("API_KEY") {
        if !key.trim().is_empty() {
            tracing::info!("Using API key from environment");
            config.api_key = key;
        }
    }

    if let Ok(port) = std::env::var("PORT") {
        match port.trim().parse::<u16>() {
            Ok(p) if p > 0 => {
                config.port = p;
                tracing::info!("Using proxy port from environment: {}", p);
            }
            _ => tracing::warn!("ignoring invalid PORT value: {}", port),
        }
    }

    if let Ok(strategy) = std::env::var("GYRE_ROTATION_STRATEGY") {
        match parse_strategy(&strategy) {
            Some(s) => config.rotation.strategy = s,
            None => tracing::warn!("ignoring invalid GYRE_ROTATION_STRATEGY: {}", strategy),
        }
    }

    if let Ok(count) = std::env::var("GYRE_ROTATION_REQUEST_COUNT") {
        match count.trim().parse::<u64>() {
            Ok(n) if n > 0 => config.rotation.request_count = n,
            _ => tracing::warn!("ignoring invalid GYRE_ROTATION_REQUEST_COUNT: {}", count),
        }
    }

    if let Ok(times) = std::env::var("GYRE_RETRY_TIMES") {
        match times.trim().parse::<usize>() {
            Ok(n) => config.retry_times = n,
            Err(_) => tracing::warn!("ignoring invalid GYRE_RETRY_TIMES: {}", times),
        }
    }

    if let Ok(fake) = std::env::var("GYRE_FAKE_NON_STREAM") {
        match parse_env_bool(&fake) {
            Some(v) => config.fake_non_stream = v,
            None => tracing::warn!("ignoring invalid GYRE_FAKE_NON_STREAM: {}", fake),
        }
    }

    if let Ok(enc) = std::env::var("GYRE_ENCRYPT_ACCOUNTS") {
        match parse_env_bool(&enc) {
            Some(v) => config.encrypt_accounts = v,
            None => tracing::warn!("ignoring invalid GYRE_ENCRYPT_ACCOUNTS: {}", enc),
        }
    }
}

pub fn validate(config: &AppConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    if config.api_key.trim().is_empty() {
        errors.push("api_key must not be empty".to_string());
    }
    if config.rotation.request_count == 0 {
        errors.push("rotation.request_count must be at least 1".to_string());
    }
    if config.heartbeat_secs == 0 {
        errors.push("heartbeat_secs must be at least 1".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
