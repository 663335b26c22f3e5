//! Field-level diffing between an observed remote record and the desired
//! local profile.
//!
//! Only changed fields are collected, each with its from/to values, and
//! the update payload carries only the "to" side. The full record is
//! never round-tripped, so a manual change to an untracked remote field
//! can never be reverted from here.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::model::{LocalUser, RemoteAccount};

/// One changed field with its observed and desired values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDelta {
    pub from: Value,
    pub to: Value,
}

/// Changed profile fields keyed by remote field name.
pub type ProfileDiff = BTreeMap<String, FieldDelta>;

/// Compute the profile delta for a mapped user.
///
/// Covers first name (preferred name wins locally), last name, and the
/// derived disabled flag (local disabled level ⇔ remote `is_disabled`).
#[must_use]
pub fn profile_diff(user: &LocalUser, remote: &RemoteAccount) -> ProfileDiff {
    let mut diff = ProfileDiff::new();

    let desired_first = user.desired_first_name();
    if remote.first_name.as_deref() != Some(desired_first) {
        diff.insert(
            "first_name".to_string(),
            FieldDelta {
                from: option_str(&remote.first_name),
                to: Value::String(desired_first.to_string()),
            },
        );
    }

    if remote.last_name.as_deref() != Some(user.last_name.as_str()) {
        diff.insert(
            "last_name".to_string(),
            FieldDelta {
                from: option_str(&remote.last_name),
                to: Value::String(user.last_name.clone()),
            },
        );
    }

    let desired_disabled = user.account_level.is_disabled();
    if remote.is_disabled != desired_disabled {
        diff.insert(
            "is_disabled".to_string(),
            FieldDelta {
                from: Value::Bool(remote.is_disabled),
                to: Value::Bool(desired_disabled),
            },
        );
    }

    diff
}

/// Extract the "to" values from a diff as a partial-update payload.
#[must_use]
pub fn update_payload(diff: &ProfileDiff) -> serde_json::Map<String, Value> {
    diff.iter()
        .map(|(field, delta)| (field.clone(), delta.to.clone()))
        .collect()
}

fn option_str(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountLevel, UserKind};
    use uuid::Uuid;

    fn user() -> LocalUser {
        LocalUser {
            id: Uuid::new_v4(),
            username: Some("rlee".into()),
            email: Some("rlee@example.org".into()),
            first_name: "Rosa".into(),
            last_name: "Lee".into(),
            preferred_name: None,
            account_level: AccountLevel::User,
            kind: UserKind::Staff,
            school_id: None,
            graduation_year: None,
        }
    }

    fn remote() -> RemoteAccount {
        RemoteAccount {
            id: 5,
            first_name: Some("Rosa".into()),
            last_name: Some("Lee".into()),
            email: Some("rlee@example.org".into()),
            is_disabled: false,
            ..RemoteAccount::default()
        }
    }

    #[test]
    fn matching_records_produce_empty_diff() {
        assert!(profile_diff(&user(), &remote()).is_empty());
    }

    #[test]
    fn only_changed_field_appears() {
        let mut r = remote();
        r.last_name = Some("Leigh".into());

        let diff = profile_diff(&user(), &r);
        assert_eq!(diff.len(), 1);
        let delta = &diff["last_name"];
        assert_eq!(delta.from, Value::String("Leigh".into()));
        assert_eq!(delta.to, Value::String("Lee".into()));

        let payload = update_payload(&diff);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload["last_name"], Value::String("Lee".into()));
        assert!(!payload.contains_key("first_name"));
        assert!(!payload.contains_key("is_disabled"));
    }

    #[test]
    fn preferred_name_drives_first_name_diff() {
        let mut u = user();
        u.preferred_name = Some("Rose".into());

        let diff = profile_diff(&u, &remote());
        assert_eq!(diff["first_name"].to, Value::String("Rose".into()));
    }

    #[test]
    fn disabled_flag_converges_both_directions() {
        let mut u = user();
        u.account_level = AccountLevel::Disabled;
        let diff = profile_diff(&u, &remote());
        assert_eq!(diff["is_disabled"].to, Value::Bool(true));

        let mut r = remote();
        r.is_disabled = true;
        let diff = profile_diff(&user(), &r);
        assert_eq!(diff["is_disabled"].to, Value::Bool(false));
    }

    #[test]
    fn missing_remote_name_counts_as_change() {
        let mut r = remote();
        r.first_name = None;
        let diff = profile_diff(&user(), &r);
        assert_eq!(diff["first_name"].from, Value::Null);
        assert_eq!(diff["first_name"].to, Value::String("Rosa".into()));
    }
}
