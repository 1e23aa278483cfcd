//! Persistent token storage backends
//!
//! Tokens survive process restarts in one of two backends: the OS keyring
//! when available, otherwise an AES-256-GCM encrypted file next to the
//! config. Load failures are never fatal; a missing or unreadable token
//! just means the user has to authorize again.

use crate::auth::Token;
use crate::config::data_dir;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::PathBuf;

const KEYRING_SERVICE: &str = "exactonline-mcp";
const KEYRING_ACCOUNT: &str = "oauth_tokens";

const TOKEN_FILE: &str = "tokens.json.enc";
const KEY_FILE: &str = "tokens.key";
const NONCE_LEN: usize = 12;

/// Backend-agnostic token persistence.
///
/// `load` returns `None` on any failure so a corrupt store degrades to a
/// re-authorization prompt instead of an error.
#[async_trait]
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    async fn load(&self) -> Option<Token>;
    async fn save(&self, token: &Token) -> anyhow::Result<()>;
    async fn delete(&self) -> anyhow::Result<()>;
}

/// Token storage in the operating system keyring
#[derive(Debug, Default)]
pub struct KeyringStore;

impl KeyringStore {
    fn entry() -> anyhow::Result<keyring::Entry> {
        Ok(keyring::Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT)?)
    }

    /// Check whether the keyring backend actually works on this system.
    /// Headless Linux boxes often have no secret service running.
    pub fn is_available() -> bool {
        match Self::entry() {
            Ok(entry) => match entry.get_password() {
                Ok(_) => true,
                Err(keyring::Error::NoEntry) => true,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }
}

#[async_trait]
impl TokenStore for KeyringStore {
    async fn load(&self) -> Option<Token> {
        let entry = match Self::entry() {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Keyring unavailable: {}", e);
                return None;
            }
        };
        let raw = match entry.get_password() {
            Ok(raw) => raw,
            Err(keyring::Error::NoEntry) => return None,
            Err(e) => {
                tracing::debug!("Failed to read token from keyring: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::debug!("Stored token is not valid JSON: {}", e);
                None
            }
        }
    }

    async fn save(&self, token: &Token) -> anyhow::Result<()> {
        let raw = serde_json::to_string(token)?;
        Self::entry()?.set_password(&raw)?;
        Ok(())
    }

    async fn delete(&self) -> anyhow::Result<()> {
        match Self::entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Encrypted file fallback when no keyring is available.
///
/// Tokens are sealed with AES-256-GCM; the random key lives in a sibling
/// file with owner-only permissions. The nonce is prepended to the
/// ciphertext.
#[derive(Debug)]
pub struct EncryptedFileStore {
    dir: PathBuf,
}

impl EncryptedFileStore {
    pub fn new() -> Self {
        Self { dir: data_dir() }
    }

    #[cfg(test)]
    fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    fn load_or_create_key(&self) -> anyhow::Result<Key<Aes256Gcm>> {
        let path = self.key_path();
        if path.exists() {
            let encoded = std::fs::read_to_string(&path)?;
            let bytes = BASE64.decode(encoded.trim())?;
            if bytes.len() != 32 {
                anyhow::bail!("encryption key has wrong length");
            }
            return Ok(*Key::<Aes256Gcm>::from_slice(&bytes));
        }

        std::fs::create_dir_all(&self.dir)?;
        let key = Aes256Gcm::generate_key(OsRng);
        std::fs::write(&path, BASE64.encode(key))?;
        restrict_permissions(&path)?;
        Ok(key)
    }
}

impl Default for EncryptedFileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for EncryptedFileStore {
    async fn load(&self) -> Option<Token> {
        let path = self.token_path();
        if !path.exists() {
            return None;
        }

        let key = match self.load_or_create_key() {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("Failed to load encryption key: {}", e);
                return None;
            }
        };
        let blob = match std::fs::read(&path) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::debug!("Failed to read token file: {}", e);
                return None;
            }
        };
        if blob.len() <= NONCE_LEN {
            tracing::debug!("Token file is truncated");
            return None;
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&key);
        let plaintext = match cipher.decrypt(Nonce::from_slice(nonce), ciphertext) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                tracing::debug!("Token file failed to decrypt");
                return None;
            }
        };

        match serde_json::from_slice(&plaintext) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::debug!("Decrypted token is not valid JSON: {}", e);
                None
            }
        }
    }

    async fn save(&self, token: &Token) -> anyhow::Result<()> {
        let key = self.load_or_create_key()?;
        let cipher = Aes256Gcm::new(&key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let plaintext = serde_json::to_vec(token)?;
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| anyhow::anyhow!("token encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);

        std::fs::create_dir_all(&self.dir)?;
        let path = self.token_path();
        std::fs::write(&path, blob)?;
        restrict_permissions(&path)?;
        Ok(())
    }

    async fn delete(&self) -> anyhow::Result<()> {
        let path = self.token_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

/// Pick the best available backend: keyring first, encrypted file fallback.
pub fn default_store() -> Box<dyn TokenStore> {
    if KeyringStore::is_available() {
        tracing::debug!("Using OS keyring for token storage");
        Box::new(KeyringStore)
    } else {
        tracing::debug!("Keyring unavailable, using encrypted file storage");
        Box::new(EncryptedFileStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_token() -> Token {
        Token {
            access_token: "access-abc".to_string(),
            refresh_token: "refresh-xyz".to_string(),
            obtained_at: Utc::now(),
            expires_in: 600,
        }
    }

    #[tokio::test]
    async fn test_encrypted_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::with_dir(dir.path().to_path_buf());

        assert!(store.load().await.is_none());

        let token = sample_token();
        store.save(&token).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.access_token, token.access_token);
        assert_eq!(loaded.refresh_token, token.refresh_token);
        assert_eq!(loaded.expires_in, token.expires_in);
    }

    #[tokio::test]
    async fn test_token_file_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::with_dir(dir.path().to_path_buf());
        store.save(&sample_token()).await.unwrap();

        let blob = std::fs::read(store.token_path()).unwrap();
        let raw = String::from_utf8_lossy(&blob);
        assert!(!raw.contains("access-abc"));
        assert!(!raw.contains("refresh-xyz"));
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::with_dir(dir.path().to_path_buf());
        store.save(&sample_token()).await.unwrap();

        std::fs::write(store.token_path(), b"garbage that is not ciphertext").unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_then_load_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::with_dir(dir.path().to_path_buf());
        store.save(&sample_token()).await.unwrap();

        store.delete().await.unwrap();
        assert!(store.load().await.is_none());

        // Deleting again is not an error
        store.delete().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::with_dir(dir.path().to_path_buf());
        store.save(&sample_token()).await.unwrap();

        let mode = std::fs::metadata(store.key_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
