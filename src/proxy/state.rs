use std::sync::Arc;
use std::time::Instant;

use crate::models::AppConfig;
use crate::proxy::token::AccountManager;
use crate::proxy::upstream::UpstreamClient;
use crate::proxy::variant::Variant;

/// One upstream variant's pool plus its transport.
#[derive(Clone)]
pub struct PoolHandle {
    pub manager: Arc<AccountManager>,
    pub upstream: Arc<UpstreamClient>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub antigravity: PoolHandle,
    pub gemini_cli: PoolHandle,
    pub started_at: Instant,
}

impl AppState {
    pub fn pool(&self, variant: Variant) -> &PoolHandle {
        match variant {
            Variant::Antigravity => &self.antigravity,
            Variant::GeminiCli => &self.gemini_cli,
        }
    }
}
