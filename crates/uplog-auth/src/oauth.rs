use async_trait::async_trait;
use serde::Deserialize;

use crate::error::AuthError;
use crate::storage::TokenSet;

/// OAuth2 configuration
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    /// Client ID from OAuth provider
    pub client_id: String,

    /// Client secret from OAuth provider
    pub client_secret: String,

    /// Authorization endpoint URL
    pub auth_url: String,

    /// Token endpoint URL
    pub token_url: String,

    /// Redirect URI for OAuth callback
    pub redirect_uri: String,

    /// Scopes to request
    pub scopes: Vec<String>,
}

/// Layout of the client secret file downloaded from the Google Cloud console.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Debug, Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
    auth_uri: String,
    token_uri: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl OAuth2Config {
    /// Parse a Google credentials blob (either the `installed` or the `web`
    /// flavour). The first listed redirect URI is used.
    pub fn from_google_credentials(json: &str, scopes: &[&str]) -> Result<Self, AuthError> {
        let file: CredentialsFile = serde_json::from_str(json)
            .map_err(|e| AuthError::InvalidCredentials(e.to_string()))?;

        let section = file.web.or(file.installed).ok_or_else(|| {
            AuthError::InvalidCredentials("missing \"installed\" or \"web\" section".to_string())
        })?;

        let redirect_uri = section.redirect_uris.into_iter().next().ok_or_else(|| {
            AuthError::InvalidCredentials("no redirect_uris configured".to_string())
        })?;

        Ok(Self {
            client_id: section.client_id,
            client_secret: section.client_secret,
            auth_url: section.auth_uri,
            token_url: section.token_uri,
            redirect_uri,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }
}

/// A started authorization handshake: the URL to send the user to, the
/// opaque state the provider echoes back, and the PKCE verifier matching the
/// challenge embedded in the URL.
#[derive(Clone)]
pub struct PendingAuthorization {
    pub url: String,
    pub state: String,
    pub verifier: String,
}

impl std::fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("verifier", &"<redacted>")
            .finish()
    }
}

/// Identity provider side of the PKCE authorization code flow.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Generate a fresh state and verifier and the authorization URL that
    /// embeds the state and the derived S256 challenge.
    fn begin_authorization(&self) -> Result<PendingAuthorization, AuthError>;

    /// Trade an authorization code plus the verifier of its handshake for a
    /// token.
    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenSet, AuthError>;

    /// Obtain a new access token from a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;
}
