use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use sha2::Digest;

const NONCE_LEN: usize = 12;

/// Key material: ENCRYPTION_KEY env wins; otherwise the machine UID so a
/// store copied to another host does not decrypt.
fn get_encryption_key() -> [u8; 32] {
    let seed = std::env::var("ENCRYPTION_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| machine_uid::get().unwrap_or_else(|_| "default".to_string()));
    let mut key = [0u8; 32];
    let hash = sha2::Sha256::digest(seed.as_bytes());
    key.copy_from_slice(&hash);
    key
}

pub fn encrypt_string(plaintext: &str) -> Result<String, String> {
    let key = get_encryption_key();
    let cipher = Aes256Gcm::new(&key.into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| format!("Encryption failed: {}", e))?;

    let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    packed.extend_from_slice(&nonce_bytes);
    packed.extend_from_slice(&ciphertext);
    Ok(general_purpose::STANDARD.encode(packed))
}

pub fn decrypt_string(encrypted: &str) -> Result<String, String> {
    let key = get_encryption_key();
    let cipher = Aes256Gcm::new(&key.into());

    let decoded = general_purpose::STANDARD
        .decode(encrypted)
        .map_err(|e| format!("Base64 decode failed: {}", e))?;

    if decoded.len() <= NONCE_LEN {
        return Err("Ciphertext too short".to_string());
    }

    let (nonce_bytes, ciphertext) = decoded.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| format!("Decryption failed: {}", e))?;
    String::from_utf8(plaintext).map_err(|e| format!("UTF-8 conversion failed: {}", e))
}

/// Stores written before encryption was enabled hold plaintext tokens.
pub fn decrypt_secret_or_plaintext(value: &str) -> String {
    decrypt_string(value).unwrap_or_else(|_| value.to_string())
}
