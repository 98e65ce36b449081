//! Access tokens for the assistant service
//!
//! Credentials come from a JSON file written by an OAuth helper:
//!
//! ```json
//! {
//!   "token": "ya29...",
//!   "refresh_token": "1//...",
//!   "client_id": "...",
//!   "client_secret": "...",
//!   "token_uri": "https://oauth2.googleapis.com/token"
//! }
//! ```
//!
//! With refresh material the token is refreshed once at startup; otherwise the
//! stored token is used as is. An explicit access token always wins.

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

/// Token endpoint used when the file doesn't name one
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Stored OAuth credentials
#[derive(Deserialize)]
pub struct StoredCredentials {
    /// Last access token
    #[serde(default)]
    pub token: Option<String>,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OAuth client id
    #[serde(default)]
    pub client_id: Option<String>,
    /// OAuth client secret
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Token endpoint
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl std::fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl StoredCredentials {
    /// Read credentials from `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or not valid JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Credentials(format!("failed to read {}: {e}", path.display()))
        })?;
        let credentials: Self = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded credentials");
        Ok(credentials)
    }

    /// Whether the file carries everything needed for a refresh
    #[must_use]
    pub const fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }

    /// Exchange the refresh token for a fresh access token
    ///
    /// # Errors
    ///
    /// Returns error if refresh material is missing or the endpoint rejects it
    pub async fn refresh(&self, client: &reqwest::Client) -> Result<SecretString> {
        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            self.refresh_token.as_deref(),
            self.client_id.as_deref(),
            self.client_secret.as_deref(),
        ) else {
            return Err(Error::Credentials("no refresh material".to_string()));
        };

        let token_uri = self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let response = client
            .post(token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Credentials(format!("token refresh failed {status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        tracing::info!(expires_in = ?token.expires_in, "access token refreshed");
        Ok(SecretString::from(token.access_token))
    }
}

/// Resolve the access token to use
///
/// Order: `explicit` (e.g. `ASSIST_ACCESS_TOKEN`), a refresh through the
/// credentials file, then the file's stored token.
///
/// # Errors
///
/// Returns [`Error::Config`] if no token can be found, or the refresh error
pub async fn resolve_access_token(
    explicit: Option<SecretString>,
    path: Option<&Path>,
) -> Result<SecretString> {
    if let Some(token) = explicit.filter(|t| !t.expose_secret().is_empty()) {
        tracing::debug!("using explicit access token");
        return Ok(token);
    }

    let Some(path) = path else {
        return Err(Error::Config(
            "no access token or credentials file configured".to_string(),
        ));
    };

    let stored = StoredCredentials::load(path)?;
    if stored.can_refresh() {
        return stored.refresh(&reqwest::Client::new()).await;
    }

    stored
        .token
        .filter(|t| !t.is_empty())
        .map(SecretString::from)
        .ok_or_else(|| {
            Error::Config(format!("{} has neither a token nor refresh material", path.display()))
        })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn write(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn explicit_token_wins() {
        let token = resolve_access_token(Some(SecretString::from(String::from("abc"))), None)
            .await
            .unwrap();
        assert_eq!(token.expose_secret(), "abc");
    }

    #[tokio::test]
    async fn stored_token_without_refresh() {
        let (_dir, path) = write(r#"{"token": "stored"}"#);
        let token = resolve_access_token(None, Some(path.as_path())).await.unwrap();
        assert_eq!(token.expose_secret(), "stored");
    }

    #[tokio::test]
    async fn nothing_configured_is_config_error() {
        let err = resolve_access_token(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let (_dir, path) = write("{}");
        let err = resolve_access_token(None, Some(path.as_path())).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn debug_redacts_tokens() {
        let (_dir, path) = write(r#"{"token": "secret-value", "client_id": "cid"}"#);
        let stored = StoredCredentials::load(&path).unwrap();
        let shown = format!("{stored:?}");
        assert!(!shown.contains("secret-value"));
        assert!(shown.contains("cid"));
        assert!(!stored.can_refresh());
    }
}
