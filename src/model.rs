//! Local and remote account models.
//!
//! `LocalUser` is read-only to the engine: it comes from the authoritative
//! directory and is never mutated here. `RemoteAccount` is observed state,
//! fetched fresh per reconciliation so the diff never runs against a stale
//! snapshot.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned by the remote service to an account.
pub type RemoteId = i64;

/// Identifier of a remote role.
pub type RoleId = i64;

/// Identifier of a remote group.
pub type GroupId = i64;

/// Field projection requested when fetching a mapped remote account.
pub const REMOTE_ACCOUNT_FIELDS: &str =
    "id,first_name,last_name,email,group_ids,role_ids,is_disabled";

/// Minimal projection used by the batch email-index prefetch.
pub const REMOTE_INDEX_FIELDS: &str = "id,email";

/// Access level of a local account. `Disabled` is a sentinel: such users
/// are never eligible for remote account creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountLevel {
    Disabled,
    Contact,
    User,
    Staff,
    Administrator,
}

impl AccountLevel {
    #[must_use]
    pub fn is_disabled(self) -> bool {
        matches!(self, Self::Disabled)
    }
}

/// Account type/class of a local user, used as an explicit lookup key into
/// the per-type desired-state rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserKind {
    Student,
    Alumni,
    Teacher,
    Staff,
    Guardian,
}

/// A user record from the authoritative local directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: Uuid,
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    /// Preferred first name; takes precedence over `first_name` when
    /// computing the desired remote profile.
    pub preferred_name: Option<String>,
    pub account_level: AccountLevel,
    pub kind: UserKind,
    pub school_id: Option<i64>,
    pub graduation_year: Option<i32>,
}

impl LocalUser {
    /// The first name the remote account should carry.
    #[must_use]
    pub fn desired_first_name(&self) -> &str {
        self.preferred_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.first_name)
    }

    /// Display handle for log lines; falls back to the UUID when the
    /// directory has no username for this user.
    #[must_use]
    pub fn handle(&self) -> String {
        self.username
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// An account as observed on the remote service.
///
/// Transient: not owned by the engine, deserialized from each fetch.
/// Sets default so that partial field projections deserialize cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteAccount {
    /// Defaults to 0 when absent so a create response with no identifier
    /// can be classified as a creation failure rather than a parse error.
    #[serde(default)]
    pub id: RemoteId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub group_ids: BTreeSet<GroupId>,
    #[serde(default)]
    pub role_ids: BTreeSet<RoleId>,
}

/// One custom attribute value as listed by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeValue {
    /// Remote numeric identifier of the attribute definition; updates are
    /// keyed by this, not by name.
    pub user_attribute_id: i64,
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Payload for the bulk set-roles call.
#[derive(Debug, Clone, Serialize)]
pub struct RoleAssignment {
    pub role_ids: Vec<RoleId>,
}

/// A role as echoed back by the set-roles response.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleRecord {
    pub id: RoleId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> LocalUser {
        LocalUser {
            id: Uuid::new_v4(),
            username: Some("mbarnes".into()),
            email: Some("mbarnes@example.org".into()),
            first_name: "Margaret".into(),
            last_name: "Barnes".into(),
            preferred_name: None,
            account_level: AccountLevel::Staff,
            kind: UserKind::Teacher,
            school_id: None,
            graduation_year: None,
        }
    }

    #[test]
    fn preferred_name_wins_when_present() {
        let mut u = user();
        assert_eq!(u.desired_first_name(), "Margaret");

        u.preferred_name = Some("Peggy".into());
        assert_eq!(u.desired_first_name(), "Peggy");

        u.preferred_name = Some(String::new());
        assert_eq!(u.desired_first_name(), "Margaret");
    }

    #[test]
    fn remote_account_deserializes_partial_projection() {
        let account: RemoteAccount =
            serde_json::from_str(r#"{"id": 7, "email": "a@x.com"}"#).unwrap();
        assert_eq!(account.id, 7);
        assert_eq!(account.email.as_deref(), Some("a@x.com"));
        assert!(account.group_ids.is_empty());
        assert!(account.role_ids.is_empty());
        assert!(!account.is_disabled);
    }
}
