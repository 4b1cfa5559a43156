use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::constants;
use crate::error::TokenError;
use crate::models::{Account, AccountView, AppConfig, RotationConfig, RotationStrategy};
use crate::modules::auth::oauth;
use crate::proxy::token::project;
use crate::proxy::token::store::TokenStore;
use crate::proxy::upstream::UpstreamClient;
use crate::proxy::variant::Variant;

/// Patch applied by the admin surface; `None` leaves a field untouched.
#[derive(Debug, Default, serde::Deserialize)]
pub struct AccountPatch {
    pub enable: Option<bool>,
    pub email: Option<String>,
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
    #[serde(rename = "hasQuota")]
    pub has_quota: Option<bool>,
}

enum PrepareOutcome {
    Ready(Account),
    Disable(String),
    Skip(String),
}

/// One rotation pool. Two instances exist per process, one per variant,
/// each owning its store file. All mutation goes through this type; the
/// accounts handed to request handlers are snapshots.
pub struct AccountManager {
    variant: Variant,
    store: TokenStore,
    salt: String,
    accounts: DashMap<String, Account>,
    active_ids: RwLock<Vec<String>>,
    current_index: AtomicUsize,
    request_counts: DashMap<String, u64>,
    rotation: RwLock<RotationConfig>,
    refresh_buffer_ms: i64,
    http: reqwest::Client,
    oauth_token_url: String,
    upstream: Arc<UpstreamClient>,
}

impl AccountManager {
    pub fn new(
        variant: Variant,
        store: TokenStore,
        config: &AppConfig,
        upstream: Arc<UpstreamClient>,
    ) -> Result<Self, String> {
        let salt = store.salt()?;
        Ok(Self {
            variant,
            store,
            salt,
            accounts: DashMap::new(),
            active_ids: RwLock::new(Vec::new()),
            current_index: AtomicUsize::new(0),
            request_counts: DashMap::new(),
            rotation: RwLock::new(config.rotation.clone()),
            refresh_buffer_ms: config.refresh_buffer_ms,
            http: reqwest::Client::new(),
            oauth_token_url: constants::OAUTH_TOKEN_URL.to_string(),
            upstream,
        })
    }

    #[cfg(test)]
    pub fn set_oauth_endpoint_for_test(&mut self, url: &str) {
        self.oauth_token_url = url.to_string();
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub async fn active_len(&self) -> usize {
        self.active_ids.read().await.len()
    }

    /// Load the store and concurrently refresh every expired active
    /// account. 400/403 refreshes disable their account in one batch.
    pub async fn init(&self) -> Result<usize, String> {
        let count = self.reload().await?;

        let expired: Vec<String> = {
            let active = self.active_ids.read().await;
            active
                .iter()
                .filter(|id| {
                    self.accounts
                        .get(id.as_str())
                        .map(|a| a.is_expired(self.refresh_buffer_ms))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        if !expired.is_empty() {
            tracing::info!(
                "[{}] Refreshing {} expired account(s) at startup",
                self.variant.label(),
                expired.len()
            );
            let refreshes = expired.iter().map(|id| self.refresh_account(id));
            let results = futures::future::join_all(refreshes).await;
            for (id, result) in expired.iter().zip(results) {
                if let Err(e) = result {
                    tracing::warn!(
                        "[{}] Startup refresh failed for {}: {}",
                        self.variant.label(),
                        id,
                        e.message
                    );
                }
            }
        }

        Ok(count)
    }

    /// Atomic rebuild from the store. In-flight requests keep their
    /// account snapshots; they are never retried against removed entries.
    pub async fn reload(&self) -> Result<usize, String> {
        let loaded = self.store.load()?;

        let mut active = Vec::new();
        self.accounts.clear();
        for account in loaded {
            let id = account.token_id(&self.salt);
            if account.enable {
                active.push(id.clone());
            }
            self.accounts.insert(id, account);
        }
        let count = active.len();

        {
            let mut lock = self.active_ids.write().await;
            *lock = active;
        }
        self.current_index.store(0, Ordering::SeqCst);
        self.request_counts.clear();
        tracing::info!(
            "[{}] Loaded {} active account(s)",
            self.variant.label(),
            count
        );
        Ok(count)
    }

    pub async fn update_rotation_config(&self, config: RotationConfig) {
        {
            let mut lock = self.rotation.write().await;
            *lock = config;
        }
        self.request_counts.clear();
    }

    /// Best-effort account selection. Scans at most one full cycle from
    /// the rotation index; prepare failures with a dead grant disable the
    /// account and the scan continues. Never yields a disabled account,
    /// never raises; `None` means the pool is exhausted.
    pub async fn get_token(&self) -> Option<Account> {
        let ids = self.active_ids.read().await.clone();
        let n = ids.len();
        if n == 0 {
            return None;
        }
        let mut start = self.current_index.load(Ordering::SeqCst) % n;

        // Under request_count the cursor moves when the current account has
        // already served its quota, so the next account serves this call.
        let rotation = self.rotation.read().await.clone();
        if matches!(rotation.strategy, RotationStrategy::RequestCount) {
            let current = &ids[start];
            let served = self.request_counts.get(current.as_str()).map(|c| *c).unwrap_or(0);
            if served >= rotation.request_count {
                self.request_counts.insert(current.clone(), 0);
                start = (start + 1) % n;
                self.current_index.store(start, Ordering::SeqCst);
            }
        }

        for offset in 0..n {
            let pos = (start + offset) % n;
            let id = &ids[pos];
            let account = match self.accounts.get(id.as_str()) {
                Some(entry) if entry.enable => entry.clone(),
                _ => continue,
            };

            match self.prepare(id, account).await {
                PrepareOutcome::Ready(account) => {
                    self.advance_after_success(pos, n, id).await;
                    return Some(account);
                }
                PrepareOutcome::Disable(reason) => {
                    tracing::warn!(
                        "[{}] Disabling account {}: {}",
                        self.variant.label(),
                        id,
                        reason
                    );
                    self.disable_account(id).await;
                }
                PrepareOutcome::Skip(reason) => {
                    tracing::debug!(
                        "[{}] Skipping account {}: {}",
                        self.variant.label(),
                        id,
                        reason
                    );
                }
            }
        }
        None
    }

    async fn prepare(&self, token_id: &str, account: Account) -> PrepareOutcome {
        let mut account = account;

        if account.is_expired(self.refresh_buffer_ms) {
            match self.refresh_account(token_id).await {
                Ok(refreshed) => account = refreshed,
                Err(e) if e.kills_account() => return PrepareOutcome::Disable(e.message),
                Err(e) => return PrepareOutcome::Skip(e.message),
            }
        }

        if self.variant.requires_project_id() && account.project_id.is_none() {
            match project::fetch_project_id(&self.upstream, &account.access_token).await {
                Ok(Some(project_id)) => {
                    self.save_project_id(token_id, &project_id).await;
                    account.project_id = Some(project_id);
                }
                Ok(None) => {
                    return PrepareOutcome::Disable(
                        "project id bootstrap exhausted onboarding attempts".to_string(),
                    )
                }
                Err(e) => return PrepareOutcome::Skip(e),
            }
        }

        PrepareOutcome::Ready(account)
    }

    async fn advance_after_success(&self, pos: usize, n: usize, _token_id: &str) {
        let rotation = self.rotation.read().await.clone();
        match rotation.strategy {
            RotationStrategy::RoundRobin => {
                self.current_index.store((pos + 1) % n, Ordering::SeqCst);
            }
            // Stays put; the pre-scan shift in get_token does the moving
            // once the counter fills, and quota_exhausted only moves on a
            // caller report.
            RotationStrategy::RequestCount | RotationStrategy::QuotaExhausted => {
                self.current_index.store(pos, Ordering::SeqCst);
            }
        }
    }

    /// Counted once per logical client request, after it succeeds.
    /// Retries inside one request do not re-increment.
    pub fn record_request(&self, token_id: &str) {
        let mut count = self.request_counts.entry(token_id.to_string()).or_insert(0);
        *count += 1;
    }

    /// Caller-side quota signal (429 / quota-exhausted error body): move
    /// the rotation cursor past this account.
    pub async fn report_quota_exhausted(&self, token_id: &str) {
        let ids = self.active_ids.read().await;
        let n = ids.len();
        if n == 0 {
            return;
        }
        if let Some(pos) = ids.iter().position(|id| id == token_id) {
            self.current_index.store((pos + 1) % n, Ordering::SeqCst);
        }
        if let Some(mut account) = self.accounts.get_mut(token_id) {
            account.has_quota = Some(false);
        }
    }

    /// OAuth refresh with atomic field update and persistence. A refresh
    /// rejected with 400/403 disables the account before returning.
    pub async fn refresh_account(&self, token_id: &str) -> Result<Account, TokenError> {
        let refresh_token = self
            .accounts
            .get(token_id)
            .map(|a| a.refresh_token.clone())
            .ok_or_else(|| TokenError::new("unknown account", token_id, None))?;

        let result = oauth::refresh_access_token(
            &self.http,
            &self.oauth_token_url,
            &self.variant.oauth_credentials(),
            &refresh_token,
        )
        .await;

        match result {
            Ok(token) => {
                let updated = {
                    let mut entry = self
                        .accounts
                        .get_mut(token_id)
                        .ok_or_else(|| TokenError::new("account disappeared", token_id, None))?;
                    entry.apply_refresh(token.access_token, token.expires_in);
                    entry.clone()
                };
                if let Err(e) = self.store.upsert(updated.clone()) {
                    tracing::warn!("[{}] Failed to persist refresh: {}", self.variant.label(), e);
                }
                Ok(updated)
            }
            Err(e) => {
                let error = TokenError::new(e.message, token_id, e.status);
                if error.kills_account() {
                    tracing::warn!(
                        "[{}] Refresh rejected with {:?}, disabling {}",
                        self.variant.label(),
                        error.status,
                        token_id
                    );
                    self.disable_account(token_id).await;
                }
                Err(error)
            }
        }
    }

    pub async fn disable_account(&self, token_id: &str) {
        let refresh_token = match self.accounts.get_mut(token_id) {
            Some(mut entry) => {
                entry.enable = false;
                entry.refresh_token.clone()
            }
            None => return,
        };
        {
            let mut active = self.active_ids.write().await;
            active.retain(|id| id != token_id);
        }
        self.request_counts.remove(token_id);
        let result = self.store.update(|mut accounts| {
            for account in &mut accounts {
                if account.refresh_token == refresh_token {
                    account.enable = false;
                }
            }
            accounts
        });
        if let Err(e) = result {
            tracing::warn!("[{}] Failed to persist disable: {}", self.variant.label(), e);
        }
    }

    async fn save_project_id(&self, token_id: &str, project_id: &str) {
        let refresh_token = match self.accounts.get_mut(token_id) {
            Some(mut entry) => {
                entry.project_id = Some(project_id.to_string());
                entry.refresh_token.clone()
            }
            None => return,
        };
        let project_id = project_id.to_string();
        let result = self.store.update(move |mut accounts| {
            for account in &mut accounts {
                if account.refresh_token == refresh_token {
                    account.project_id = Some(project_id.clone());
                }
            }
            accounts
        });
        if let Err(e) = result {
            tracing::warn!(
                "[{}] Failed to persist project id: {}",
                self.variant.label(),
                e
            );
        }
    }

    /// Explicit bootstrap for the admin surface (both variants).
    pub async fn fetch_project_id_for_token(
        &self,
        token_id: &str,
    ) -> Result<Option<String>, String> {
        let account = self
            .accounts
            .get(token_id)
            .map(|a| a.clone())
            .ok_or_else(|| "unknown account".to_string())?;
        let access_token = if account.is_expired(self.refresh_buffer_ms) {
            self.refresh_account(token_id)
                .await
                .map_err(|e| e.message)?
                .access_token
        } else {
            account.access_token
        };

        let project = project::fetch_project_id(&self.upstream, &access_token).await?;
        if let Some(project_id) = &project {
            self.save_project_id(token_id, project_id).await;
        }
        Ok(project)
    }

    // ---- admin surface -------------------------------------------------

    pub async fn list_accounts(&self) -> Vec<AccountView> {
        self.accounts
            .iter()
            .map(|entry| AccountView::from_account(entry.value(), &self.salt, self.refresh_buffer_ms))
            .collect()
    }

    pub async fn add_account(&self, mut account: Account) -> Result<AccountView, String> {
        if account.refresh_token.trim().is_empty() {
            return Err("refresh_token must not be empty".to_string());
        }
        account.enable = true;
        let token_id = account.token_id(&self.salt);

        self.store.upsert(account.clone())?;
        self.accounts.insert(token_id.clone(), account.clone());
        {
            let mut active = self.active_ids.write().await;
            if !active.contains(&token_id) {
                active.push(token_id.clone());
            }
        }

        // Validate the grant eagerly; a dead grant disables right away.
        match self.refresh_account(&token_id).await {
            Ok(refreshed) => Ok(AccountView::from_account(
                &refreshed,
                &self.salt,
                self.refresh_buffer_ms,
            )),
            Err(e) => {
                tracing::warn!(
                    "[{}] Added account failed initial refresh: {}",
                    self.variant.label(),
                    e.message
                );
                let current = self
                    .accounts
                    .get(&token_id)
                    .map(|a| a.clone())
                    .unwrap_or(account);
                Ok(AccountView::from_account(
                    &current,
                    &self.salt,
                    self.refresh_buffer_ms,
                ))
            }
        }
    }

    pub async fn update_account(
        &self,
        token_id: &str,
        patch: AccountPatch,
    ) -> Result<AccountView, String> {
        let (updated, refresh_token) = {
            let mut entry = self
                .accounts
                .get_mut(token_id)
                .ok_or_else(|| "unknown account".to_string())?;
            if let Some(enable) = patch.enable {
                entry.enable = enable;
            }
            if let Some(email) = patch.email {
                entry.email = Some(email);
            }
            if let Some(project_id) = patch.project_id {
                entry.project_id = Some(project_id);
            }
            if let Some(has_quota) = patch.has_quota {
                entry.has_quota = Some(has_quota);
            }
            (entry.clone(), entry.refresh_token.clone())
        };

        {
            let mut active = self.active_ids.write().await;
            if updated.enable {
                if !active.iter().any(|id| id == token_id) {
                    active.push(token_id.to_string());
                }
            } else {
                active.retain(|id| id != token_id);
            }
        }

        let persisted = updated.clone();
        self.store.update(move |mut accounts| {
            for account in &mut accounts {
                if account.refresh_token == refresh_token {
                    *account = persisted.clone();
                }
            }
            accounts
        })?;

        Ok(AccountView::from_account(
            &updated,
            &self.salt,
            self.refresh_buffer_ms,
        ))
    }

    pub async fn delete_account(&self, token_id: &str) -> Result<(), String> {
        let refresh_token = self
            .accounts
            .remove(token_id)
            .map(|(_, a)| a.refresh_token)
            .ok_or_else(|| "unknown account".to_string())?;
        {
            let mut active = self.active_ids.write().await;
            active.retain(|id| id != token_id);
        }
        self.request_counts.remove(token_id);
        self.store.update(|mut accounts| {
            accounts.retain(|a| a.refresh_token != refresh_token);
            accounts
        })?;
        Ok(())
    }

    /// Full decrypted dump; the admin surface re-verifies the operator
    /// before exposing this.
    pub fn export_accounts(&self) -> Result<Vec<Account>, String> {
        self.store.load()
    }

    pub async fn import_accounts(&self, imported: Vec<Account>) -> Result<usize, String> {
        let count = imported.len();
        self.store.update(move |mut accounts| {
            for incoming in imported {
                match accounts
                    .iter_mut()
                    .find(|a| a.refresh_token == incoming.refresh_token)
                {
                    Some(existing) => *existing = incoming,
                    None => accounts.push(incoming),
                }
            }
            accounts
        })?;
        self.reload().await?;
        Ok(count)
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod manager_tests;
