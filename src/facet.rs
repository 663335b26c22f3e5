//! Facet syncers: roles, groups, and custom attributes.
//!
//! Three structurally similar sub-engines, each computing an additive
//! delta between desired and observed state and applying it through the
//! remote client. Convergence is one-way by policy: a role, group, or
//! attribute present remotely but absent from local desired state is
//! never removed, so manually granted access is never revoked here.
//!
//! Verification differs per facet because the remote API differs:
//! roles are set in one bulk call whose response must contain every
//! added id (a miss is a hard facet failure); groups are added one call
//! per group with per-item failures logged and skipped; attributes are
//! patched one by one with each response's echoed value checked.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::client::RemoteAccountService;
use crate::desired::DesiredState;
use crate::error::{SyncError, SyncResult};
use crate::model::{AttributeValue, GroupId, LocalUser, RemoteId, RoleId};

/// One of the three independently-synced aspects of a remote account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    Roles,
    Groups,
    Attributes,
}

impl std::fmt::Display for Facet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facet::Roles => write!(f, "role"),
            Facet::Groups => write!(f, "group"),
            Facet::Attributes => write!(f, "custom attribute"),
        }
    }
}

/// Outcome of one facet's sync for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetOutcome {
    /// Observed state already matched desired state; no call issued.
    Verified,
    /// An additive change was applied (or, in dry-run, would have been).
    Updated,
}

impl FacetOutcome {
    #[must_use]
    pub fn is_updated(self) -> bool {
        matches!(self, Self::Updated)
    }
}

/// Converge the account's role set toward the desired set.
///
/// Issues one bulk set-roles call carrying `desired ∪ observed` (never a
/// removal), then verifies no element of the additive delta is missing
/// from the response. A missing element is a hard failure for this facet.
pub async fn sync_roles(
    client: &dyn RemoteAccountService,
    user: &LocalUser,
    remote_id: Option<RemoteId>,
    desired: &BTreeSet<RoleId>,
    observed: &BTreeSet<RoleId>,
    pretend: bool,
) -> SyncResult<FacetOutcome> {
    let to_add: BTreeSet<RoleId> = desired.difference(observed).copied().collect();
    if to_add.is_empty() {
        debug!(user = %user.handle(), "Role set already converged");
        return Ok(FacetOutcome::Verified);
    }

    if pretend {
        info!(
            user = %user.handle(),
            roles = ?to_add,
            "Would add roles (pretend)"
        );
        return Ok(FacetOutcome::Updated);
    }

    let id = remote_id.ok_or_else(|| SyncError::Facet {
        facet: Facet::Roles,
        message: format!("no remote account id for {}", user.handle()),
    })?;

    let union: BTreeSet<RoleId> = desired.union(observed).copied().collect();
    let response = client.set_roles(id, &union).await?;
    let resulting: BTreeSet<RoleId> = response.iter().map(|role| role.id).collect();

    let missing: Vec<RoleId> = to_add
        .iter()
        .copied()
        .filter(|role_id| !resulting.contains(role_id))
        .collect();
    if !missing.is_empty() {
        return Err(SyncError::Facet {
            facet: Facet::Roles,
            message: format!(
                "roles {missing:?} missing from response for {}",
                user.handle()
            ),
        });
    }

    info!(user = %user.handle(), roles = ?to_add, "Added roles");
    Ok(FacetOutcome::Updated)
}

/// Converge the account's group memberships toward the desired set.
///
/// The remote API has no bulk group-add primitive, so one add call is
/// issued per missing group. A per-item failure is logged and does not
/// abort the remaining additions; the facet only fails outright when
/// every addition failed.
pub async fn sync_groups(
    client: &dyn RemoteAccountService,
    user: &LocalUser,
    remote_id: Option<RemoteId>,
    desired: &BTreeSet<GroupId>,
    observed: &BTreeSet<GroupId>,
    pretend: bool,
) -> SyncResult<FacetOutcome> {
    let to_add: BTreeSet<GroupId> = desired.difference(observed).copied().collect();
    if to_add.is_empty() {
        debug!(user = %user.handle(), "Group memberships already converged");
        return Ok(FacetOutcome::Verified);
    }

    if pretend {
        info!(
            user = %user.handle(),
            groups = ?to_add,
            "Would add to groups (pretend)"
        );
        return Ok(FacetOutcome::Updated);
    }

    let id = remote_id.ok_or_else(|| SyncError::Facet {
        facet: Facet::Groups,
        message: format!("no remote account id for {}", user.handle()),
    })?;

    let mut added = 0usize;
    for group_id in &to_add {
        match client.add_to_group(id, *group_id).await {
            Ok(record) if record.group_ids.contains(group_id) => {
                info!(user = %user.handle(), group_id, "Added to group");
                added += 1;
            }
            Ok(record) => {
                warn!(
                    user = %user.handle(),
                    group_id,
                    resulting = ?record.group_ids,
                    "Group add response does not contain the group, skipping"
                );
            }
            Err(e) => {
                warn!(
                    user = %user.handle(),
                    group_id,
                    error = %e,
                    "Failed to add to group, continuing with remaining groups"
                );
            }
        }
    }

    if added == 0 {
        return Err(SyncError::Facet {
            facet: Facet::Groups,
            message: format!(
                "none of {} group addition(s) succeeded for {}",
                to_add.len(),
                user.handle()
            ),
        });
    }

    Ok(FacetOutcome::Updated)
}

/// Converge the account's custom attribute values toward the desired map.
///
/// Fetches the remote attribute-value list (empty when the account was
/// just created or simulated), stages an update for each attribute whose
/// name is tracked locally and whose value differs, then patches them
/// sequentially, verifying each echoed value. A per-item mismatch is
/// logged and skipped; successful updates still count toward `Updated`.
pub async fn sync_attributes(
    client: &dyn RemoteAccountService,
    user: &LocalUser,
    remote_id: Option<RemoteId>,
    desired: &DesiredState,
    pretend: bool,
) -> SyncResult<FacetOutcome> {
    if desired.attributes.is_empty() {
        return Ok(FacetOutcome::Verified);
    }

    // Reads still execute in dry-run so the preview is accurate; only a
    // simulated account (no id yet) observes an empty list.
    let current: Vec<AttributeValue> = match remote_id {
        Some(id) => client.list_attribute_values(id).await?,
        None => Vec::new(),
    };

    let staged: Vec<(&AttributeValue, &str)> = current
        .iter()
        .filter_map(|attribute| {
            desired
                .attributes
                .get(&attribute.name)
                .filter(|want| attribute.value.as_deref() != Some(want.as_str()))
                .map(|want| (attribute, want.as_str()))
        })
        .collect();

    if staged.is_empty() {
        debug!(user = %user.handle(), "Custom attributes already converged");
        return Ok(FacetOutcome::Verified);
    }

    if pretend {
        for (attribute, want) in &staged {
            info!(
                user = %user.handle(),
                attribute = %attribute.name,
                from = ?attribute.value,
                to = %want,
                "Would update custom attribute (pretend)"
            );
        }
        return Ok(FacetOutcome::Updated);
    }

    let id = remote_id.ok_or_else(|| SyncError::Facet {
        facet: Facet::Attributes,
        message: format!("no remote account id for {}", user.handle()),
    })?;

    let mut updated = 0usize;
    for (attribute, want) in &staged {
        match client
            .set_attribute_value(id, attribute.user_attribute_id, &attribute.name, want)
            .await
        {
            Ok(echoed) if echoed.value.as_deref() == Some(*want) => {
                info!(
                    user = %user.handle(),
                    attribute = %attribute.name,
                    value = %want,
                    "Updated custom attribute"
                );
                updated += 1;
            }
            Ok(echoed) => {
                warn!(
                    user = %user.handle(),
                    attribute = %attribute.name,
                    expected = %want,
                    echoed = ?echoed.value,
                    "Attribute update response does not match staged value, skipping"
                );
            }
            Err(e) => {
                warn!(
                    user = %user.handle(),
                    attribute = %attribute.name,
                    error = %e,
                    "Failed to update custom attribute, continuing"
                );
            }
        }
    }

    if updated == 0 {
        return Err(SyncError::Facet {
            facet: Facet::Attributes,
            message: format!(
                "none of {} staged attribute update(s) succeeded for {}",
                staged.len(),
                user.handle()
            ),
        });
    }

    Ok(FacetOutcome::Updated)
}
