//! Job configuration and lifecycle.
//!
//! The engine treats a job as an append-only result sink; status and
//! result persistence belong to whatever framework hosts the connector.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::ApiCredentials;
use crate::error::{SyncError, SyncResult};

/// Lifecycle status of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

/// Configuration a job run carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    pub client_id: String,
    #[serde(skip_serializing, default)]
    pub client_secret: String,
    /// Whether to run the push-users task.
    pub push_users: bool,
    /// Optional school filter; empty means every school.
    #[serde(default)]
    pub push_schools: Vec<i64>,
}

impl JobConfig {
    /// Validate that the credentials required to start are present.
    pub fn validate(&self) -> SyncResult<()> {
        if self.client_id.is_empty() {
            return Err(SyncError::Config(
                "cannot execute job, clientId not provided".into(),
            ));
        }
        if self.client_secret.is_empty() {
            return Err(SyncError::Config(
                "cannot execute job, clientSecret not provided".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn credentials(&self) -> ApiCredentials {
        ApiCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}

/// One sync job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub status: JobStatus,
    pub config: JobConfig,
    /// Per-task result payloads, keyed by task name.
    pub results: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    #[must_use]
    pub fn new(config: JobConfig) -> Self {
        Self {
            status: JobStatus::Pending,
            config,
            results: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_fail_validation() {
        let mut config = JobConfig {
            client_id: String::new(),
            client_secret: "s".into(),
            push_users: true,
            push_schools: vec![],
        };
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        config.client_id = "c".into();
        config.client_secret = String::new();
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        config.client_secret = "s".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn secret_is_not_serialized() {
        let job = Job::new(JobConfig {
            client_id: "c".into(),
            client_secret: "hunter2".into(),
            push_users: true,
            push_schools: vec![1],
        });
        let serialized = serde_json::to_string(&job).unwrap();
        assert!(!serialized.contains("hunter2"));
        assert!(serialized.contains("\"client_id\":\"c\""));
    }
}
