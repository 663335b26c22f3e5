//! Remote API session authentication.
//!
//! One client/secret pair per job run. `login` is called once before any
//! user is processed; the resulting access token is shared (behind an
//! `RwLock`, so clones of the session see the same token) and attached to
//! every request as `Authorization: token <access_token>`. A 401 mid-batch
//! invalidates the cached token so the run fails the current user instead
//! of silently proceeding unauthenticated.

use std::sync::Arc;

use reqwest::RequestBuilder;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Client credentials for the remote service.
///
/// The [`Debug`] impl redacts the secret to prevent accidental credential
/// exposure in log output.
#[derive(Clone)]
pub struct ApiCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Token response from the login endpoint.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// Authenticated session against the remote service.
#[derive(Debug, Clone)]
pub struct ApiSession {
    http_client: reqwest::Client,
    /// Cached access token, shared across clones.
    token: Arc<RwLock<Option<String>>>,
}

impl ApiSession {
    #[must_use]
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Exchange client credentials for an access token at `login_url`.
    ///
    /// A missing or empty credential is a configuration error (the job
    /// never starts); a rejected login is an authentication error (fatal
    /// to the job).
    pub async fn login(&self, login_url: &str, credentials: &ApiCredentials) -> SyncResult<()> {
        if credentials.client_id.is_empty() {
            return Err(SyncError::Config("clientId not provided".into()));
        }
        if credentials.client_secret.is_empty() {
            return Err(SyncError::Config("clientSecret not provided".into()));
        }

        debug!(url = %login_url, client_id = %credentials.client_id, "Logging in to remote API");

        let response = self
            .http_client
            .post(login_url)
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SyncError::Auth(format!("login request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(SyncError::Auth(format!(
                "login rejected (HTTP {status}): {body}"
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("failed to parse login response: {e}")))?;

        let access_token = login
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Auth("no access_token in login response".into()))?;

        let mut cache = self.token.write().await;
        *cache = Some(access_token);
        Ok(())
    }

    /// Attach the session token to a request builder.
    ///
    /// Fails if `login` has not succeeded (or the token was invalidated),
    /// so a mid-batch session loss surfaces as an auth error for the
    /// current user instead of an unauthenticated request.
    pub async fn apply(&self, builder: RequestBuilder) -> SyncResult<RequestBuilder> {
        let cache = self.token.read().await;
        let token = cache
            .as_ref()
            .ok_or_else(|| SyncError::Auth("no active session; login required".into()))?;
        Ok(builder.header("Authorization", format!("token {token}")))
    }

    /// Drop the cached token (e.g. after a 401 response).
    pub async fn invalidate(&self) {
        let mut cache = self.token.write().await;
        *cache = None;
    }
}
