//! Batch runner: one full push pass over the eligible local users.
//!
//! Establishes the API session once, prefetches a remote-account-by-email
//! index to heal missing mappings, reconciles each user sequentially, and
//! tallies outcomes. Per-user failures are recorded and never abort the
//! batch; only configuration and login failures stop a job before it
//! starts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::client::RemoteAccountService;
use crate::engine::{ReconciliationEngine, SyncStatus};
use crate::error::{SyncError, SyncResult};
use crate::job::{Job, JobStatus};
use crate::model::{LocalUser, RemoteId, REMOTE_INDEX_FIELDS};

/// Result key the push-users task stores its tally under.
const PUSH_USERS_TASK: &str = "push-users";

/// Read-only boundary to the authoritative local directory.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// All users the directory knows about; the runner applies the
    /// eligibility filter itself.
    async fn list_users(&self) -> SyncResult<Vec<LocalUser>>;
}

/// In-memory directory for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    users: Vec<LocalUser>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new(users: Vec<LocalUser>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn list_users(&self) -> SyncResult<Vec<LocalUser>> {
        Ok(self.users.clone())
    }
}

/// Outcome counts for one push-users pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTally {
    pub analyzed: u32,
    pub created: u32,
    pub updated: u32,
    pub verified: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl PushTally {
    fn record(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Created => self.created += 1,
            SyncStatus::Updated => self.updated += 1,
            SyncStatus::Verified => self.verified += 1,
            SyncStatus::Skipped => self.skipped += 1,
        }
    }
}

/// Runs a job's push-users task over the whole directory.
pub struct BatchRunner {
    client: Arc<dyn RemoteAccountService>,
    directory: Arc<dyn UserDirectory>,
    engine: ReconciliationEngine,
}

impl BatchRunner {
    pub fn new(
        client: Arc<dyn RemoteAccountService>,
        directory: Arc<dyn UserDirectory>,
        engine: ReconciliationEngine,
    ) -> Self {
        Self {
            client,
            directory,
            engine,
        }
    }

    /// Execute a job: validate, log in, run the configured tasks, and
    /// record the results on the job.
    ///
    /// Configuration and login failures mark the job `Failed` without
    /// processing any user.
    pub async fn synchronize(&self, job: &mut Job, pretend: bool) -> SyncResult<()> {
        if job.status == JobStatus::Failed {
            return Err(SyncError::Config(
                "cannot execute job, status is not Pending or Completed".into(),
            ));
        }
        job.config.validate()?;

        if let Err(e) = self.client.login(&job.config.credentials()).await {
            job.status = JobStatus::Failed;
            return Err(e);
        }

        job.status = JobStatus::Pending;

        if job.config.push_users {
            let tally = self.push_users(job, pretend).await?;
            job.results
                .insert(PUSH_USERS_TASK.to_string(), serde_json::to_value(tally)?);
        }

        job.status = JobStatus::Completed;
        Ok(())
    }

    /// Reconcile every eligible user once and tally the outcomes.
    pub async fn push_users(&self, job: &Job, pretend: bool) -> SyncResult<PushTally> {
        let mut tally = PushTally::default();

        let users = self.directory.list_users().await?;
        let eligible: Vec<&LocalUser> = users
            .iter()
            .filter(|user| Self::is_eligible(user, &job.config.push_schools))
            .collect();

        info!(
            eligible = eligible.len(),
            total = users.len(),
            pretend,
            "Starting push-users pass"
        );

        // One pass over the remote account list, indexed by email, heals
        // mappings that were lost or never recorded so an existing account
        // is linked instead of duplicated.
        let email_index = self.prefetch_email_index().await;

        for user in eligible {
            debug!(
                username = %user.handle(),
                class = ?user.kind,
                graduation_year = ?user.graduation_year,
                "Analyzing user"
            );
            tally.analyzed += 1;

            let discovered = user
                .email
                .as_deref()
                .and_then(|email| email_index.get(&email.to_ascii_lowercase()))
                .copied();

            match self.engine.reconcile_user(user, discovered, pretend).await {
                Ok(report) => {
                    debug!(username = %user.handle(), status = %report.status, "{}", report.message);
                    tally.record(report.status);
                }
                Err(e) => {
                    // Recorded against the job; the batch always continues
                    // to the remaining users.
                    error!(username = %user.handle(), error = %e, "User sync failed");
                    tally.failed += 1;
                }
            }
        }

        info!(
            analyzed = tally.analyzed,
            created = tally.created,
            updated = tally.updated,
            verified = tally.verified,
            skipped = tally.skipped,
            failed = tally.failed,
            "Push-users pass finished"
        );

        Ok(tally)
    }

    /// Eligibility: a username, a non-disabled account level, and (when a
    /// school filter is configured) a matching school.
    fn is_eligible(user: &LocalUser, push_schools: &[i64]) -> bool {
        if user.username.is_none() || user.account_level.is_disabled() {
            return false;
        }
        if push_schools.is_empty() {
            return true;
        }
        user.school_id
            .map(|school| push_schools.contains(&school))
            .unwrap_or(false)
    }

    /// Fetch every remote account with a minimal projection and index by
    /// case-folded email. Opportunistic: a failure degrades mapping
    /// healing but does not abort the batch.
    async fn prefetch_email_index(&self) -> HashMap<String, RemoteId> {
        match self.client.list_all(REMOTE_INDEX_FIELDS).await {
            Ok(accounts) => {
                let mut index = HashMap::with_capacity(accounts.len());
                for account in accounts {
                    if let Some(email) = account.email {
                        index.insert(email.to_ascii_lowercase(), account.id);
                    }
                }
                debug!(indexed = index.len(), "Prefetched remote email index");
                index
            }
            Err(e) => {
                warn!(error = %e, "Failed to prefetch remote accounts, skipping mapping heal");
                HashMap::new()
            }
        }
    }
}
