//! OAuth2 plumbing for the uplog calendar sync: client configuration, the
//! PKCE handshake, token persistence and the loopback redirect listener.

pub mod callback;
pub mod error;
pub mod google;
pub mod oauth;
pub mod storage;

pub use callback::{wait_for_callback, AuthorizationCallback};
pub use error::AuthError;
pub use google::{GoogleOAuth2Provider, CALENDAR_EVENTS_SCOPE};
pub use oauth::{Authenticator, OAuth2Config, PendingAuthorization};
pub use storage::{TokenSet, TokenStore};
