//! Google OAuth2 provider for Calendar access.

use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse,
    TokenUrl,
};

use crate::error::AuthError;
use crate::oauth::{Authenticator, OAuth2Config, PendingAuthorization};
use crate::storage::TokenSet;

/// Read/write access to events, nothing else on the account.
pub const CALENDAR_EVENTS_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events";

/// Lifetime assumed when the token endpoint doesn't say.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

pub struct GoogleOAuth2Provider {
    config: OAuth2Config,
}

impl GoogleOAuth2Provider {
    pub fn new(config: OAuth2Config) -> Self {
        Self { config }
    }

    /// Build a provider straight from the credentials JSON, requesting the
    /// calendar events scope.
    pub fn from_credentials(json: &str) -> Result<Self, AuthError> {
        Ok(Self::new(OAuth2Config::from_google_credentials(
            json,
            &[CALENDAR_EVENTS_SCOPE],
        )?))
    }

    pub fn config(&self) -> &OAuth2Config {
        &self.config
    }

    fn client(&self) -> Result<BasicClient, AuthError> {
        let config = &self.config;

        let auth_url = AuthUrl::new(config.auth_url.clone())
            .map_err(|e| AuthError::InvalidUrl(format!("auth url: {}", e)))?;
        let token_url = TokenUrl::new(config.token_url.clone())
            .map_err(|e| AuthError::InvalidUrl(format!("token url: {}", e)))?;
        let redirect_url = RedirectUrl::new(config.redirect_uri.clone())
            .map_err(|e| AuthError::InvalidUrl(format!("redirect uri: {}", e)))?;

        Ok(BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_redirect_uri(redirect_url))
    }
}

#[async_trait]
impl Authenticator for GoogleOAuth2Provider {
    fn begin_authorization(&self) -> Result<PendingAuthorization, AuthError> {
        let client = self.client()?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = client.authorize_url(CsrfToken::new_random);
        for scope in &self.config.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        // Offline access so the token comes with a refresh token.
        let (auth_url, csrf_token) = auth_request
            .add_extra_param("access_type", "offline")
            .set_pkce_challenge(pkce_challenge)
            .url();

        Ok(PendingAuthorization {
            url: auth_url.to_string(),
            state: csrf_token.secret().clone(),
            verifier: pkce_verifier.secret().clone(),
        })
    }

    #[tracing::instrument(skip_all, level = "info")]
    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenSet, AuthError> {
        let token = self
            .client()?
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::TokenExchange(describe(&e)))?;

        tracing::info!("OAuth2 code exchange completed");
        Ok(token_set_from_response(&token, None))
    }

    #[tracing::instrument(skip_all, level = "info")]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let token = self
            .client()?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::TokenRefresh(describe(&e)))?;

        Ok(token_set_from_response(&token, Some(refresh_token)))
    }
}

/// Google omits the refresh token on refresh responses; keep the old one.
fn token_set_from_response(token: &BasicTokenResponse, previous_refresh: Option<&str>) -> TokenSet {
    let expires_in = token
        .expires_in()
        .map(|d| d.as_secs() as i64)
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

    let scopes = token
        .scopes()
        .map(|s| s.iter().map(|scope| scope.to_string()).collect())
        .unwrap_or_default();

    TokenSet {
        access_token: token.access_token().secret().clone(),
        refresh_token: token
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| previous_refresh.map(str::to_string)),
        expires_at: chrono::Utc::now().timestamp() + expires_in,
        scopes,
    }
}

fn describe<RE>(err: &RequestTokenError<RE, BasicErrorResponse>) -> String
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => response.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(token_url: &str) -> GoogleOAuth2Provider {
        GoogleOAuth2Provider::new(OAuth2Config {
            client_id: "test_client_id".to_string(),
            client_secret: "test_client_secret".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: token_url.to_string(),
            redirect_uri: "http://localhost:8080/".to_string(),
            scopes: vec![CALENDAR_EVENTS_SCOPE.to_string()],
        })
    }

    #[test]
    fn test_auth_url_carries_pkce_and_offline_access() {
        let pending = provider("https://oauth2.googleapis.com/token")
            .begin_authorization()
            .unwrap();

        let url = url::Url::parse(&pending.url).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params.get("state"), Some(&pending.state));
        assert_eq!(params.get("code_challenge_method").map(String::as_str), Some("S256"));
        assert!(params.contains_key("code_challenge"));
        assert_eq!(params.get("access_type").map(String::as_str), Some("offline"));
        assert!(params["scope"].contains("calendar.events"));
        assert_ne!(params["code_challenge"], pending.verifier);
    }

    #[test]
    fn test_state_and_verifier_are_unique() {
        let provider = provider("https://oauth2.googleapis.com/token");
        let first = provider.begin_authorization().unwrap();
        let second = provider.begin_authorization().unwrap();
        assert_ne!(first.state, second.state);
        assert_ne!(first.verifier, second.verifier);
    }

    #[test]
    fn test_from_credentials_requests_calendar_scope() {
        let json = r#"{"installed": {
            "client_id": "id", "client_secret": "s",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token",
            "redirect_uris": ["http://localhost"]
        }}"#;
        let provider = GoogleOAuth2Provider::from_credentials(json).unwrap();
        assert_eq!(provider.config().scopes, vec![CALENDAR_EVENTS_SCOPE.to_string()]);
    }

    #[tokio::test]
    async fn test_exchange_code_sends_verifier() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=auth-code"))
            .and(body_string_contains("code_verifier=the-verifier"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 3599,
                "token_type": "Bearer",
                "scope": CALENDAR_EVENTS_SCOPE
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = provider(&format!("{}/token", mock_server.uri()));
        let token = provider
            .exchange_code("auth-code", "the-verifier")
            .await
            .unwrap();

        assert_eq!(token.access_token, "access");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh"));
        assert!(!token.is_expired());
        assert_eq!(token.scopes, vec![CALENDAR_EVENTS_SCOPE.to_string()]);
    }

    #[tokio::test]
    async fn test_exchange_code_provider_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Bad Request"
            })))
            .mount(&mock_server)
            .await;

        let provider = provider(&format!("{}/token", mock_server.uri()));
        let err = provider.exchange_code("stale", "verifier").await.unwrap_err();

        assert!(matches!(err, AuthError::TokenExchange(ref msg) if msg.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_refresh_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&mock_server)
            .await;

        let provider = provider(&format!("{}/token", mock_server.uri()));
        let token = provider.refresh("long-lived").await.unwrap();

        assert_eq!(token.access_token, "fresh");
        assert_eq!(token.refresh_token.as_deref(), Some("long-lived"));
    }
}
