//! Authentication error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid OAuth client credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid OAuth endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Token has no refresh token")]
    MissingRefreshToken,

    #[error("OAuth callback failed: {0}")]
    Callback(String),

    #[error("Port {0} already in use for OAuth callback")]
    PortInUse(u16),
}

impl AuthError {
    /// Whether the user has to go through the browser handshake again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::TokenRefresh(_) | Self::MissingRefreshToken | Self::InvalidCredentials(_)
        )
    }
}
