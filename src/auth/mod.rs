//! OAuth2 authentication for Exact Online
//!
//! Authorization-code flow for the initial grant, refresh-token flow for
//! everything after. Exact Online rotates the refresh token on every
//! refresh and invalidates the old one the moment the new one is issued,
//! so a refreshed token is persisted before it is handed to any caller.

pub mod storage;

use crate::config::Config;
use crate::error::ExactError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use storage::TokenStore;
use tokio::sync::Mutex;

const AUTH_PATH: &str = "/api/oauth2/auth";
const TOKEN_PATH: &str = "/api/oauth2/token";
const DEFAULT_EXPIRES_IN: i64 = 600;

/// A persisted OAuth2 token pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub obtained_at: DateTime<Utc>,
    /// Access token lifetime in seconds (Exact Online issues 600)
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    DEFAULT_EXPIRES_IN
}

impl Token {
    /// Whether the access token is expired or will be within `buffer` seconds.
    pub fn is_expired(&self, buffer: i64) -> bool {
        let age = Utc::now().signed_duration_since(self.obtained_at).num_seconds();
        age >= self.expires_in - buffer
    }
}

/// Wire shape of the provider's token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default = "default_expires_in")]
    #[serde(deserialize_with = "deserialize_expires_in")]
    expires_in: i64,
}

/// Exact Online sends expires_in as a JSON string, not a number.
fn deserialize_expires_in<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .parse()
            .map_err(|e| D::Error::custom(format!("invalid expires_in: {}", e))),
    }
}

impl From<TokenResponse> for Token {
    fn from(response: TokenResponse) -> Self {
        Token {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            obtained_at: Utc::now(),
            expires_in: response.expires_in,
        }
    }
}

/// OAuth2 client for the authorization-code and refresh-token grants
pub struct OAuth2Client {
    base_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
    store: Box<dyn TokenStore>,
    // Serializes refreshes: concurrent callers would otherwise race with
    // the same refresh token, and the loser's token is already invalid.
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for OAuth2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Client")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl OAuth2Client {
    pub fn new(config: &Config, store: Box<dyn TokenStore>) -> Self {
        Self {
            base_url: config.region.base_url().to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            http: reqwest::Client::new(),
            store,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Build the authorization URL the user must open in a browser, plus
    /// the random state value to verify on the way back.
    pub fn authorization_url(&self) -> (String, String) {
        let mut state_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut state_bytes);
        let state = URL_SAFE_NO_PAD.encode(state_bytes);

        let mut url = format!("{}{}", self.base_url, AUTH_PATH);
        url.push('?');
        url.push_str(
            &url::form_urlencoded::Serializer::new(String::new())
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("state", &state)
                .finish(),
        );
        (url, state)
    }

    /// Exchange an authorization code for tokens and persist them.
    ///
    /// A token that cannot be persisted is useless: the server would start
    /// with no stored tokens and the rotated refresh token would be lost,
    /// so persistence failure is an error here too.
    pub async fn exchange_code(&self, code: &str) -> Result<Token, ExactError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code", code),
        ];
        let token = self.token_request(&params).await?;
        self.persist(&token).await?;
        Ok(token)
    }

    /// Return a token whose access token is valid, refreshing if needed.
    ///
    /// Callers racing on an expired token serialize on the refresh lock;
    /// the winner refreshes and the rest re-load the fresh token.
    pub async fn get_valid_token(&self) -> Result<Token, ExactError> {
        let token = self.store.load().await.ok_or_else(|| {
            ExactError::Authentication {
                message: "No stored tokens found".to_string(),
            }
        })?;

        if !token.is_expired(30) {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.store.load().await {
            if !token.is_expired(30) {
                return Ok(token);
            }
            return self.refresh(&token).await;
        }

        Err(ExactError::Authentication {
            message: "No stored tokens found".to_string(),
        })
    }

    /// Refresh the token pair. The new pair is persisted before returning;
    /// losing a rotated refresh token means the user must re-authorize.
    async fn refresh(&self, current: &Token) -> Result<Token, ExactError> {
        tracing::debug!("Refreshing access token");
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", current.refresh_token.as_str()),
        ];
        let token = self.token_request(&params).await?;
        self.persist(&token).await?;
        Ok(token)
    }

    async fn persist(&self, token: &Token) -> Result<(), ExactError> {
        if let Err(e) = self.store.save(token).await {
            tracing::error!("Failed to persist token: {}", e);
            return Err(ExactError::Authentication {
                message: format!("Could not persist token: {}", e),
            });
        }
        Ok(())
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<Token, ExactError> {
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let response = self
            .http
            .post(&url)
            .form(params)
            .send()
            .await
            .map_err(|e| ExactError::Network {
                message: "Token request failed".to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("Token endpoint answered {}: {}", status, body);
            return Err(ExactError::Authentication {
                message: format!("Token request rejected ({})", status.as_u16()),
            });
        }

        let parsed: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| ExactError::Authentication {
                    message: format!("Invalid token response: {}", e),
                })?;
        Ok(parsed.into())
    }

    /// Drop all persisted tokens.
    pub async fn logout(&self) -> anyhow::Result<()> {
        self.store.delete().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;

    fn token_obtained_secs_ago(age: i64, expires_in: i64) -> Token {
        Token {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            obtained_at: Utc::now() - Duration::seconds(age),
            expires_in,
        }
    }

    #[test]
    fn test_fresh_token_not_expired() {
        let token = token_obtained_secs_ago(0, 600);
        assert!(!token.is_expired(30));
    }

    #[test]
    fn test_token_expired_within_buffer() {
        // 580s old, 600s lifetime: inside a 30s safety buffer
        let token = token_obtained_secs_ago(580, 600);
        assert!(token.is_expired(30));
        assert!(!token.is_expired(0));
    }

    #[test]
    fn test_token_past_lifetime() {
        let token = token_obtained_secs_ago(700, 600);
        assert!(token.is_expired(0));
    }

    #[test]
    fn test_expiry_is_monotone_in_buffer() {
        // A token expired at buffer b stays expired at every larger buffer
        let token = token_obtained_secs_ago(400, 600);
        let mut was_expired = false;
        for buffer in 0..=600 {
            let expired = token.is_expired(buffer);
            assert!(!was_expired || expired, "buffer {}", buffer);
            was_expired = expired;
        }
    }

    #[test]
    fn test_token_response_expires_in_as_string() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token": "a", "refresh_token": "r", "expires_in": "600"}"#)
                .unwrap();
        assert_eq!(parsed.expires_in, 600);
    }

    #[test]
    fn test_token_response_expires_in_as_number() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token": "a", "refresh_token": "r", "expires_in": 600}"#)
                .unwrap();
        assert_eq!(parsed.expires_in, 600);
    }

    #[test]
    fn test_token_response_expires_in_missing() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token": "a", "refresh_token": "r"}"#).unwrap();
        assert_eq!(parsed.expires_in, 600);
    }

    #[derive(Debug)]
    struct FailingStore;

    #[async_trait]
    impl TokenStore for FailingStore {
        async fn load(&self) -> Option<Token> {
            None
        }
        async fn save(&self, _token: &Token) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
        async fn delete(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn client_with_store(store: Box<dyn TokenStore>) -> OAuth2Client {
        let config = crate::config::Config {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            region: Default::default(),
            redirect_uri: "https://localhost:8080/callback".to_string(),
        };
        OAuth2Client::new(&config, store)
    }

    #[tokio::test]
    async fn test_unpersistable_token_is_an_error() {
        // A token the store cannot hold on to must not be reported as
        // stored; the rotated refresh token would be lost with it.
        let oauth = client_with_store(Box::new(FailingStore));
        let result = oauth.persist(&token_obtained_secs_ago(0, 600)).await;
        assert!(matches!(result, Err(ExactError::Authentication { .. })));
    }

    #[test]
    fn test_token_serde_round_trip() {
        let token = token_obtained_secs_ago(10, 600);
        let json = serde_json::to_string(&token).unwrap();
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back.access_token, token.access_token);
        assert_eq!(back.obtained_at, token.obtained_at);
    }
}
