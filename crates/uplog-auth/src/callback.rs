//! Loopback listener for the OAuth redirect.
//!
//! The provider redirects the browser to `http://localhost:<port>/...?code=..&state=..`;
//! the first request carrying either a code or an error ends the wait.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use warp::Filter;

use crate::error::AuthError;

const SUCCESS_PAGE: &str = "<html><body><h1>Authorization successful!</h1><p>You can close this window and return to uplog.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Authorization failed</h1><p>Check the uplog logs for details.</p></body></html>";
const WAITING_PAGE: &str = "<html><body><p>Waiting for the authorization redirect.</p></body></html>";

/// Code and state delivered by the provider's redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCallback {
    pub code: String,
    pub state: String,
}

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<Result<AuthorizationCallback, AuthError>>>>>;

/// Serve on `127.0.0.1:<port>` until the redirect arrives.
pub async fn wait_for_callback(port: u16) -> Result<AuthorizationCallback, AuthError> {
    let (tx, rx) = oneshot::channel();
    let tx: CallbackSender = Arc::new(Mutex::new(Some(tx)));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let routes = warp::get()
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::any().map(move || tx.clone()))
        .and_then(|params: HashMap<String, String>, tx: CallbackSender| async move {
            let Some(outcome) = parse_callback(&params) else {
                return Ok::<_, warp::Rejection>(warp::reply::html(WAITING_PAGE));
            };

            let page = if outcome.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };
            if let Some(sender) = tx.lock().await.take() {
                let _ = sender.send(outcome);
            }
            Ok(warp::reply::html(page))
        });

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(([127, 0, 0, 1], port), async {
            let _ = shutdown_rx.await;
        })
        .map_err(|e| {
            tracing::warn!(port, error = %e, "failed to bind OAuth callback listener");
            AuthError::PortInUse(port)
        })?;

    tracing::info!(%addr, "waiting for OAuth redirect");
    tokio::spawn(server);

    let result = rx
        .await
        .map_err(|_| AuthError::Callback("callback listener stopped".to_string()))?;
    let _ = shutdown_tx.send(());
    result
}

/// `None` for requests that are not the redirect (favicon and the like).
fn parse_callback(
    params: &HashMap<String, String>,
) -> Option<Result<AuthorizationCallback, AuthError>> {
    if let Some(error) = params.get("error") {
        return Some(Err(AuthError::Callback(error.clone())));
    }

    let code = params.get("code")?;
    let state = params.get("state").cloned().unwrap_or_default();

    Some(Ok(AuthorizationCallback {
        code: code.clone(),
        state,
    }))
}
