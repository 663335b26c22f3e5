//! Shared fixtures for the integration tests: a wiremock-backed remote
//! service, a logged-in client, and local user builders.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use idpush::auth::ApiCredentials;
use idpush::client::{HttpRemoteClient, RemoteAccountService};
use idpush::desired::DesiredStateConfig;
use idpush::engine::ReconciliationEngine;
use idpush::mapping::InMemoryMappingStore;
use idpush::model::{AccountLevel, LocalUser, UserKind};

pub const CONNECTOR: &str = "analytics";

pub fn credentials() -> ApiCredentials {
    ApiCredentials {
        client_id: "client-1".to_string(),
        client_secret: "secret-1".to_string(),
    }
}

/// Opt-in log output for debugging a failing test: run with RUST_LOG=debug.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Mount the login endpoint with a fixed token response.
pub async fn mount_login(server: &MockServer) {
    init_tracing();
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok-test" })),
        )
        .mount(server)
        .await;
}

/// Client pointing at the mock server with an established session.
pub async fn logged_in_client(server: &MockServer) -> Arc<HttpRemoteClient> {
    mount_login(server).await;
    let client = HttpRemoteClient::with_http_client(server.uri(), reqwest::Client::new());
    client.login(&credentials()).await.unwrap();
    Arc::new(client)
}

pub fn engine(
    client: Arc<dyn RemoteAccountService>,
    store: Arc<InMemoryMappingStore>,
    desired: DesiredStateConfig,
) -> ReconciliationEngine {
    ReconciliationEngine::new(client, store, desired, CONNECTOR)
}

/// A plain enabled user with a fixed id so mappings survive across calls
/// within one test.
pub fn user(username: &str, email: Option<&str>) -> LocalUser {
    LocalUser {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, username.as_bytes()),
        username: Some(username.to_string()),
        email: email.map(str::to_string),
        first_name: "Alex".to_string(),
        last_name: "Rivera".to_string(),
        preferred_name: None,
        account_level: AccountLevel::User,
        kind: UserKind::Student,
        school_id: None,
        graduation_year: Some(2028),
    }
}
