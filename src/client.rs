//! Remote account service boundary.
//!
//! [`RemoteAccountService`] is the only interface the reconciliation engine
//! depends on; [`HttpRemoteClient`] is the reqwest-backed implementation
//! speaking the remote service's REST dialect. All calls are synchronous
//! request/response; a non-2xx status surfaces as [`SyncError::Api`]
//! carrying the raw body, except a 404 on a mapped-account fetch which is
//! typed as [`SyncError::RemoteNotFound`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::auth::{ApiCredentials, ApiSession};
use crate::error::{SyncError, SyncResult};
use crate::model::{AttributeValue, GroupId, RemoteAccount, RemoteId, RoleAssignment, RoleId, RoleRecord};

/// Page size for the list-all endpoint; the remote API caps pages at 100.
const LIST_PAGE_SIZE: usize = 100;

/// Capability interface the reconciliation engine depends on.
///
/// The contract is exact: the engine's idempotence and verification logic
/// rely on `set_roles` echoing the resulting role set, `add_to_group`
/// echoing the account's group ids, and `set_attribute_value` echoing the
/// stored value.
#[async_trait]
pub trait RemoteAccountService: Send + Sync {
    /// Establish the API session for this run.
    async fn login(&self, credentials: &ApiCredentials) -> SyncResult<()>;

    /// Fetch an account by identifier with an explicit field projection.
    async fn get_account(&self, id: RemoteId, fields: &str) -> SyncResult<RemoteAccount>;

    /// Search accounts by email address.
    async fn search_by_email(&self, email: &str) -> SyncResult<Vec<RemoteAccount>>;

    /// List every account on the service with the given field projection.
    /// Paged internally; the caller sees one flattened list.
    async fn list_all(&self, fields: &str) -> SyncResult<Vec<RemoteAccount>>;

    /// Create an account carrying first/last name only. Email is
    /// provisioned separately as a login credential.
    async fn create_account(&self, first_name: &str, last_name: &str)
        -> SyncResult<RemoteAccount>;

    /// Partial update: the payload carries only the fields that changed.
    async fn update_fields(
        &self,
        id: RemoteId,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> SyncResult<RemoteAccount>;

    /// Bulk-replace the account's role set with the given union.
    async fn set_roles(&self, id: RemoteId, role_ids: &BTreeSet<RoleId>)
        -> SyncResult<Vec<RoleRecord>>;

    /// Add the account to a single group; the remote API has no bulk
    /// group-add primitive. Returns the account record with `group_ids`.
    async fn add_to_group(&self, id: RemoteId, group_id: GroupId) -> SyncResult<RemoteAccount>;

    /// List the account's current custom attribute values.
    async fn list_attribute_values(&self, id: RemoteId) -> SyncResult<Vec<AttributeValue>>;

    /// Patch a single custom attribute value, keyed by the attribute's
    /// remote numeric identifier.
    async fn set_attribute_value(
        &self,
        id: RemoteId,
        attribute_id: i64,
        name: &str,
        value: &str,
    ) -> SyncResult<AttributeValue>;

    /// Provision email login credentials for a newly created account.
    async fn create_email_credentials(&self, id: RemoteId, email: &str) -> SyncResult<()>;
}

/// HTTP client for the remote identity-consuming service.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    /// Base URL including the API root (e.g. "<https://bi.example.com:19999/api/3.1>").
    base_url: String,
    session: ApiSession,
    http_client: reqwest::Client,
}

impl HttpRemoteClient {
    pub fn new(base_url: impl Into<String>) -> SyncResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent("idpush/0.3")
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(base_url, http_client))
    }

    /// Create a client with a pre-built `reqwest::Client` (for testing).
    #[must_use]
    pub fn with_http_client(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url: base_url.clone(),
            session: ApiSession::new(http_client.clone()),
            http_client,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> SyncResult<T> {
        let url = self.url(path);
        debug!(%url, "GET");
        let mut builder = self.http_client.get(&url);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        let builder = self.session.apply(builder).await?;
        let response = builder.send().await?;
        self.handle_response(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> SyncResult<T> {
        let url = self.url(path);
        debug!(%url, "POST");
        let builder = self.session.apply(self.http_client.post(&url)).await?;
        let response = builder.json(body).send().await?;
        self.handle_response(response).await
    }

    async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> SyncResult<T> {
        let url = self.url(path);
        debug!(%url, "PUT");
        let builder = self.session.apply(self.http_client.put(&url)).await?;
        let response = builder.json(body).send().await?;
        self.handle_response(response).await
    }

    async fn patch<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> SyncResult<T> {
        let url = self.url(path);
        debug!(%url, "PATCH");
        let builder = self.session.apply(self.http_client.patch(&url)).await?;
        let response = builder.json(body).send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> SyncResult<T> {
        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body)
                .map_err(|e| SyncError::Parse(format!("{e} (body: {body})")));
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());

        if status == StatusCode::UNAUTHORIZED {
            // The token was rejected mid-batch; drop it so the failure is
            // explicit for every subsequent call instead of unauthenticated.
            self.session.invalidate().await;
            return Err(SyncError::Auth(format!(
                "session rejected (HTTP 401): {body}"
            )));
        }

        Err(SyncError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RemoteAccountService for HttpRemoteClient {
    async fn login(&self, credentials: &ApiCredentials) -> SyncResult<()> {
        self.session.login(&self.url("login"), credentials).await
    }

    async fn get_account(&self, id: RemoteId, fields: &str) -> SyncResult<RemoteAccount> {
        let result: SyncResult<RemoteAccount> = self
            .get(&format!("users/{id}"), &[("fields", fields.to_string())])
            .await;
        match result {
            Err(SyncError::Api { status: 404, body }) => {
                Err(SyncError::RemoteNotFound { id, body })
            }
            other => other,
        }
    }

    async fn search_by_email(&self, email: &str) -> SyncResult<Vec<RemoteAccount>> {
        self.get("users/search", &[("email", email.to_string())])
            .await
    }

    async fn list_all(&self, fields: &str) -> SyncResult<Vec<RemoteAccount>> {
        let mut accounts: Vec<RemoteAccount> = Vec::new();
        let mut page: usize = 1;

        loop {
            let batch: Vec<RemoteAccount> = self
                .get(
                    "users",
                    &[
                        ("fields", fields.to_string()),
                        ("per_page", LIST_PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;

            let fetched = batch.len();
            accounts.extend(batch);

            if fetched < LIST_PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(accounts)
    }

    async fn create_account(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> SyncResult<RemoteAccount> {
        self.post(
            "users",
            &serde_json::json!({
                "first_name": first_name,
                "last_name": last_name,
            }),
        )
        .await
    }

    async fn update_fields(
        &self,
        id: RemoteId,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> SyncResult<RemoteAccount> {
        self.patch(&format!("users/{id}"), fields).await
    }

    async fn set_roles(
        &self,
        id: RemoteId,
        role_ids: &BTreeSet<RoleId>,
    ) -> SyncResult<Vec<RoleRecord>> {
        let body = RoleAssignment {
            role_ids: role_ids.iter().copied().collect(),
        };
        self.put(&format!("users/{id}/roles"), &body).await
    }

    async fn add_to_group(&self, id: RemoteId, group_id: GroupId) -> SyncResult<RemoteAccount> {
        self.post(
            &format!("groups/{group_id}/users"),
            &serde_json::json!({ "user_id": id }),
        )
        .await
    }

    async fn list_attribute_values(&self, id: RemoteId) -> SyncResult<Vec<AttributeValue>> {
        self.get(&format!("users/{id}/attribute_values"), &[]).await
    }

    async fn set_attribute_value(
        &self,
        id: RemoteId,
        attribute_id: i64,
        name: &str,
        value: &str,
    ) -> SyncResult<AttributeValue> {
        self.patch(
            &format!("users/{id}/attribute_values/{attribute_id}"),
            &serde_json::json!({ "name": name, "value": value }),
        )
        .await
    }

    async fn create_email_credentials(&self, id: RemoteId, email: &str) -> SyncResult<()> {
        let _created: serde_json::Value = self
            .post(
                &format!("users/{id}/credentials_email"),
                &serde_json::json!({ "email": email }),
            )
            .await?;
        Ok(())
    }
}
