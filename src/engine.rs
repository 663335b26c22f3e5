//! Per-user reconciliation engine.
//!
//! One user is fully reconciled before the next begins: resolve the
//! identity mapping, decide create-or-verify, diff profile fields, run
//! the three facet syncers, and fold everything into one [`SyncReport`].
//! A failure inside one facet is caught at the call site and never
//! prevents the remaining facets from running or the user's overall
//! result from being computed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::RemoteAccountService;
use crate::desired::DesiredStateConfig;
use crate::diff::{profile_diff, update_payload};
use crate::error::{SyncError, SyncResult};
use crate::facet::{sync_attributes, sync_groups, sync_roles};
use crate::mapping::{MappingKey, MappingStore};
use crate::model::{LocalUser, RemoteAccount, RemoteId, REMOTE_ACCOUNT_FIELDS};

/// Terminal outcome of one user's sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Created,
    Updated,
    Verified,
    Skipped,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Created => write!(f, "created"),
            SyncStatus::Updated => write!(f, "updated"),
            SyncStatus::Verified => write!(f, "verified"),
            SyncStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of reconciling one user, usable for reporting and retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub message: String,
    /// Structured context for the message (username, remote id, reason).
    pub context: serde_json::Value,
}

impl SyncReport {
    fn new(status: SyncStatus, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            status,
            message: message.into(),
            context,
        }
    }
}

/// Reconciles one local user against the remote service.
#[derive(Clone)]
pub struct ReconciliationEngine {
    client: Arc<dyn RemoteAccountService>,
    store: Arc<dyn MappingStore>,
    desired: DesiredStateConfig,
    /// Connector name the mappings are keyed under.
    connector: String,
    /// External key field name the mappings are keyed under.
    external_key: String,
}

impl ReconciliationEngine {
    pub fn new(
        client: Arc<dyn RemoteAccountService>,
        store: Arc<dyn MappingStore>,
        desired: DesiredStateConfig,
        connector: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            desired,
            connector: connector.into(),
            external_key: "user[id]".to_string(),
        }
    }

    fn mapping_key(&self, user: &LocalUser) -> MappingKey {
        MappingKey {
            local_type: "User".to_string(),
            local_id: user.id,
            connector: self.connector.clone(),
            external_key: self.external_key.clone(),
        }
    }

    /// Reconcile one user.
    ///
    /// `discovered` is an optional remote account id found by the batch
    /// prefetch's email index; it is used to heal a missing mapping before
    /// the create-or-verify decision (persisted only outside dry-run, so a
    /// dry-run classifies the user exactly as a real run would).
    pub async fn reconcile_user(
        &self,
        user: &LocalUser,
        discovered: Option<RemoteId>,
        pretend: bool,
    ) -> SyncResult<SyncReport> {
        let key = self.mapping_key(user);
        let mut remote_id = self.store.get_mapping(&key).await?.map(|m| m.external_id);

        if remote_id.is_none() {
            if let Some(found) = discovered {
                info!(
                    user = %user.handle(),
                    remote_id = found,
                    "Healing missing mapping from email match"
                );
                if !pretend {
                    self.store.create_mapping(key.clone(), found).await?;
                }
                remote_id = Some(found);
            }
        }

        match remote_id {
            Some(id) => self.verify_or_update(user, id, pretend).await,
            None => self.create(user, key, pretend).await,
        }
    }

    /// Create path: the user has no mapping and no discovered remote match.
    async fn create(
        &self,
        user: &LocalUser,
        key: MappingKey,
        pretend: bool,
    ) -> SyncResult<SyncReport> {
        let email = match user.email.as_deref().filter(|e| !e.is_empty()) {
            Some(email) => email,
            None => {
                debug!(user = %user.handle(), "No email, skipping");
                return Ok(SyncReport::new(
                    SyncStatus::Skipped,
                    format!("No email, skipping {}", user.handle()),
                    serde_json::json!({ "username": user.handle(), "reason": "no email" }),
                ));
            }
        };

        if user.account_level.is_disabled() {
            debug!(user = %user.handle(), "Account disabled, skipping");
            return Ok(SyncReport::new(
                SyncStatus::Skipped,
                format!("Account disabled, skipping {}", user.handle()),
                serde_json::json!({ "username": user.handle(), "reason": "disabled" }),
            ));
        }

        let created_id = if pretend {
            info!(user = %user.handle(), "Would create remote account (pretend)");
            None
        } else {
            // Email is not part of the create payload; it is provisioned
            // separately as a login credential below.
            let created = self
                .client
                .create_account(user.desired_first_name(), &user.last_name)
                .await?;
            if created.id <= 0 {
                return Err(SyncError::CreationFailed {
                    body: serde_json::to_string(&created).unwrap_or_default(),
                });
            }

            self.store.create_mapping(key, created.id).await?;
            info!(
                user = %user.handle(),
                remote_id = created.id,
                "Created remote account and saved mapping"
            );

            // The account exists and is mapped at this point; a failed
            // credentials call must not undo that, so it is logged only.
            if let Err(e) = self.client.create_email_credentials(created.id, email).await {
                warn!(
                    user = %user.handle(),
                    remote_id = created.id,
                    error = %e,
                    "Failed to provision email credentials"
                );
            }

            Some(created.id)
        };

        // Facets run against the empty observed state of the new (or
        // simulated) account so the report reflects intended changes.
        self.run_facets(user, created_id, &RemoteAccount::default(), pretend)
            .await;

        Ok(SyncReport::new(
            SyncStatus::Created,
            match created_id {
                Some(id) => format!(
                    "Created remote account for {}, saved mapping to account #{id}",
                    user.handle()
                ),
                None => format!(
                    "Created remote account for {} (pretend)",
                    user.handle()
                ),
            },
            serde_json::json!({ "username": user.handle(), "remoteId": created_id }),
        ))
    }

    /// Verify-or-update path: the user is mapped to a remote account.
    async fn verify_or_update(
        &self,
        user: &LocalUser,
        id: RemoteId,
        pretend: bool,
    ) -> SyncResult<SyncReport> {
        debug!(
            user = %user.handle(),
            remote_id = id,
            "Found mapping, checking for updates"
        );

        // Fetched fresh per reconciliation; a 404 here fails this user
        // (recoverable at the batch level); the engine never re-creates
        // an account the mapping says should exist.
        let remote = self.client.get_account(id, REMOTE_ACCOUNT_FIELDS).await?;

        let diff = profile_diff(user, &remote);
        if diff.is_empty() {
            debug!(user = %user.handle(), "Remote profile matches local user");
        } else {
            info!(user = %user.handle(), changes = ?diff, "Profile fields differ");
            if !pretend {
                self.client.update_fields(id, &update_payload(&diff)).await?;
            }
        }

        let any_facet_updated = self.run_facets(user, Some(id), &remote, pretend).await;

        let status = if !diff.is_empty() || any_facet_updated {
            SyncStatus::Updated
        } else {
            SyncStatus::Verified
        };
        let message = match status {
            SyncStatus::Updated => format!("Updated remote account for {}", user.handle()),
            _ => format!(
                "Remote account for {} found and verified up-to-date",
                user.handle()
            ),
        };

        Ok(SyncReport::new(
            status,
            message,
            serde_json::json!({ "username": user.handle(), "remoteId": id }),
        ))
    }

    /// Run all three facet syncers, isolating failures.
    ///
    /// Returns whether any facet reported an update. Errors are logged at
    /// the call site and never propagate: a failed role sync must not
    /// block group or attribute sync, nor change the user's terminal
    /// status beyond excluding that facet's contribution to "updated".
    async fn run_facets(
        &self,
        user: &LocalUser,
        remote_id: Option<RemoteId>,
        observed: &RemoteAccount,
        pretend: bool,
    ) -> bool {
        let desired = self.desired.resolve(user);
        let mut any_updated = false;

        match sync_roles(
            self.client.as_ref(),
            user,
            remote_id,
            &desired.role_ids,
            &observed.role_ids,
            pretend,
        )
        .await
        {
            Ok(outcome) => any_updated |= outcome.is_updated(),
            Err(e) => warn!(user = %user.handle(), error = %e, "Role sync failed"),
        }

        match sync_groups(
            self.client.as_ref(),
            user,
            remote_id,
            &desired.group_ids,
            &observed.group_ids,
            pretend,
        )
        .await
        {
            Ok(outcome) => any_updated |= outcome.is_updated(),
            Err(e) => warn!(user = %user.handle(), error = %e, "Group sync failed"),
        }

        match sync_attributes(self.client.as_ref(), user, remote_id, &desired, pretend).await {
            Ok(outcome) => any_updated |= outcome.is_updated(),
            Err(e) => warn!(user = %user.handle(), error = %e, "Custom attribute sync failed"),
        }

        any_updated
    }
}
