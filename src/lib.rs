pub mod assertion;
pub mod auth;
pub mod batch;
pub mod client;
pub mod desired;
pub mod diff;
pub mod engine;
pub mod error;
pub mod facet;
pub mod job;
pub mod mapping;
pub mod model;

pub use error::{SyncError, SyncResult};

use std::sync::Arc;
use std::time::Duration;

/// Build an [`engine::ReconciliationEngine`] and [`batch::BatchRunner`]
/// pair sharing one HTTP client.
///
/// This is the single shared constructor used by embedding frameworks to
/// avoid duplicating client wiring.
pub fn build_runner(
    base_url: impl Into<String>,
    store: Arc<dyn mapping::MappingStore>,
    directory: Arc<dyn batch::UserDirectory>,
    desired: desired::DesiredStateConfig,
    connector: impl Into<String>,
    request_timeout: Duration,
) -> SyncResult<batch::BatchRunner> {
    let http_client = reqwest::Client::builder()
        .timeout(request_timeout)
        .build()
        .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;

    let client: Arc<dyn client::RemoteAccountService> = Arc::new(
        client::HttpRemoteClient::with_http_client(base_url, http_client),
    );

    let engine =
        engine::ReconciliationEngine::new(Arc::clone(&client), store, desired, connector);

    Ok(batch::BatchRunner::new(client, directory, engine))
}
