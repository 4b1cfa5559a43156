use std::fs;
use std::path::{Path, PathBuf};

use crate::models::Account;
use crate::utils::crypto;

/// JSON-array account file with a salt stored alongside. Writes go through
/// a temp file + rename so a crash can never leave a torn store, and every
/// mutation is expressed as read-all, merge, write-all.
pub struct TokenStore {
    path: PathBuf,
    salt_path: PathBuf,
    encrypt_at_rest: bool,
}

impl TokenStore {
    pub fn new(data_dir: &Path, file_name: &str, encrypt_at_rest: bool) -> Self {
        Self {
            path: data_dir.join(file_name),
            salt_path: data_dir.join(format!("{}.salt", file_name)),
            encrypt_at_rest,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Salt for token-id derivation, created on first use.
    pub fn salt(&self) -> Result<String, String> {
        if let Ok(existing) = fs::read_to_string(&self.salt_path) {
            let trimmed = existing.trim().to_string();
            if !trimmed.is_empty() {
                return Ok(trimmed);
            }
        }
        let salt = uuid::Uuid::new_v4().simple().to_string();
        fs::write(&self.salt_path, &salt).map_err(|e| format!("failed_to_write_salt: {}", e))?;
        Ok(salt)
    }

    pub fn load(&self) -> Result<Vec<Account>, String> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| format!("failed_to_read_account_store: {}", e))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut accounts: Vec<Account> = serde_json::from_str(&content)
            .map_err(|e| format!("failed_to_parse_account_store: {}", e))?;
        for account in &mut accounts {
            account.access_token = crypto::decrypt_secret_or_plaintext(&account.access_token);
            account.refresh_token = crypto::decrypt_secret_or_plaintext(&account.refresh_token);
        }
        Ok(accounts)
    }

    pub fn save(&self, accounts: &[Account]) -> Result<(), String> {
        let mut on_disk: Vec<Account> = accounts.to_vec();
        if self.encrypt_at_rest {
            for account in &mut on_disk {
                account.access_token = crypto::encrypt_string(&account.access_token)
                    .unwrap_or_else(|_| account.access_token.clone());
                account.refresh_token = crypto::encrypt_string(&account.refresh_token)
                    .unwrap_or_else(|_| account.refresh_token.clone());
            }
        }

        let json = serde_json::to_string_pretty(&on_disk)
            .map_err(|e| format!("failed_to_serialize_account_store: {}", e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| format!("failed_to_write_account_store: {}", e))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| format!("failed_to_commit_account_store: {}", e))
    }

    /// Read-all, apply, write-all. `mutate` sees the decrypted accounts and
    /// its return value is what lands on disk.
    pub fn update<F>(&self, mutate: F) -> Result<Vec<Account>, String>
    where
        F: FnOnce(Vec<Account>) -> Vec<Account>,
    {
        let accounts = self.load()?;
        let updated = mutate(accounts);
        self.save(&updated)?;
        Ok(updated)
    }

    /// Merge one account by refresh-token identity: replaces the matching
    /// entry or appends a new one.
    pub fn upsert(&self, account: Account) -> Result<(), String> {
        self.update(|mut accounts| {
            match accounts
                .iter_mut()
                .find(|a| a.refresh_token == account.refresh_token)
            {
                Some(existing) => *existing = account,
                None => accounts.push(account),
            }
            accounts
        })
        .map(|_| ())
    }
}
