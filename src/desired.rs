//! Desired-state resolution.
//!
//! The target state for a user's roles, groups, and custom attributes is
//! merged from three layered sources: rules keyed by account level, rules
//! keyed by account type, and an optional injected per-user override
//! closure. Resolution is a pure function of `(user, config, override)`
//! with no hidden state, so operators can configure broad defaults while
//! per-user exceptions need no code changes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::model::{AccountLevel, GroupId, LocalUser, RoleId, UserKind};

/// Computed target state for one user. Derived each run, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    pub role_ids: BTreeSet<RoleId>,
    pub group_ids: BTreeSet<GroupId>,
    pub attributes: BTreeMap<String, String>,
}

/// Partial state contributed by the per-user override closure.
#[derive(Debug, Clone, Default)]
pub struct PartialState {
    pub role_ids: BTreeSet<RoleId>,
    pub group_ids: BTreeSet<GroupId>,
    pub attributes: BTreeMap<String, String>,
}

/// Injected per-user hook with a fixed signature, merged last on every
/// facet (last-writer-wins for attribute key collisions).
pub type UserOverride = Arc<dyn Fn(&LocalUser) -> PartialState + Send + Sync>;

/// Derives an attribute value from the user record at resolution time.
pub type AttributeGetter = Arc<dyn Fn(&LocalUser) -> Option<String> + Send + Sync>;

/// How a configured custom attribute obtains its value.
///
/// An explicit `value` overrides a `getter`-derived value for the same
/// attribute name.
#[derive(Clone, Default)]
pub struct AttributeRule {
    pub value: Option<String>,
    pub getter: Option<AttributeGetter>,
}

impl AttributeRule {
    #[must_use]
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            getter: None,
        }
    }

    #[must_use]
    pub fn getter(getter: AttributeGetter) -> Self {
        Self {
            value: None,
            getter: Some(getter),
        }
    }

    fn resolve(&self, user: &LocalUser) -> Option<String> {
        if let Some(ref value) = self.value {
            return Some(value.clone());
        }
        self.getter.as_ref().and_then(|getter| getter(user))
    }
}

impl std::fmt::Debug for AttributeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeRule")
            .field("value", &self.value)
            .field("getter", &self.getter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Rules contributed by one configuration tier (account level or type).
#[derive(Debug, Clone, Default)]
pub struct StateRules {
    pub role_ids: BTreeSet<RoleId>,
    pub group_ids: BTreeSet<GroupId>,
    pub attributes: BTreeMap<String, AttributeRule>,
}

/// Explicit configuration value object passed to the engine at
/// construction; no process-wide mutable state, so concurrent job runs
/// with different configs stay deterministic.
#[derive(Clone, Default)]
pub struct DesiredStateConfig {
    pub by_level: HashMap<AccountLevel, StateRules>,
    pub by_kind: HashMap<UserKind, StateRules>,
    pub user_override: Option<UserOverride>,
}

impl std::fmt::Debug for DesiredStateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesiredStateConfig")
            .field("by_level", &self.by_level)
            .field("by_kind", &self.by_kind)
            .field("user_override", &self.user_override.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl DesiredStateConfig {
    fn tiers(&self, user: &LocalUser) -> impl Iterator<Item = &StateRules> {
        self.by_level
            .get(&user.account_level)
            .into_iter()
            .chain(self.by_kind.get(&user.kind))
    }

    /// Role ids the user's remote account should hold: the union of all
    /// three tiers, duplicates removed.
    #[must_use]
    pub fn resolve_roles(&self, user: &LocalUser) -> BTreeSet<RoleId> {
        let mut roles: BTreeSet<RoleId> = self
            .tiers(user)
            .flat_map(|rules| rules.role_ids.iter().copied())
            .collect();
        if let Some(ref hook) = self.user_override {
            roles.extend(hook(user).role_ids);
        }
        roles
    }

    /// Group ids the user's remote account should belong to.
    #[must_use]
    pub fn resolve_groups(&self, user: &LocalUser) -> BTreeSet<GroupId> {
        let mut groups: BTreeSet<GroupId> = self
            .tiers(user)
            .flat_map(|rules| rules.group_ids.iter().copied())
            .collect();
        if let Some(ref hook) = self.user_override {
            groups.extend(hook(user).group_ids);
        }
        groups
    }

    /// Custom attribute values by name. Per-kind rules override per-level
    /// rules on key collision; the override closure's entries are merged
    /// last and win over both.
    #[must_use]
    pub fn resolve_attributes(&self, user: &LocalUser) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        for rules in self.tiers(user) {
            for (name, rule) in &rules.attributes {
                if let Some(value) = rule.resolve(user) {
                    attributes.insert(name.clone(), value);
                }
            }
        }
        if let Some(ref hook) = self.user_override {
            for (name, value) in hook(user).attributes {
                attributes.insert(name, value);
            }
        }
        attributes
    }

    /// Full desired-state bundle for one user.
    #[must_use]
    pub fn resolve(&self, user: &LocalUser) -> DesiredState {
        DesiredState {
            role_ids: self.resolve_roles(user),
            group_ids: self.resolve_groups(user),
            attributes: self.resolve_attributes(user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn student() -> LocalUser {
        LocalUser {
            id: Uuid::new_v4(),
            username: Some("jdoe".into()),
            email: Some("jdoe@example.org".into()),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            preferred_name: None,
            account_level: AccountLevel::User,
            kind: UserKind::Student,
            school_id: Some(3),
            graduation_year: Some(2027),
        }
    }

    fn config() -> DesiredStateConfig {
        let mut by_level = HashMap::new();
        by_level.insert(
            AccountLevel::User,
            StateRules {
                role_ids: [1, 2].into(),
                group_ids: [10].into(),
                attributes: BTreeMap::from([(
                    "department".to_string(),
                    AttributeRule::value("general"),
                )]),
            },
        );

        let mut by_kind = HashMap::new();
        by_kind.insert(
            UserKind::Student,
            StateRules {
                role_ids: [2, 3].into(),
                group_ids: [20].into(),
                attributes: BTreeMap::from([
                    ("department".to_string(), AttributeRule::value("students")),
                    (
                        "graduation_year".to_string(),
                        AttributeRule::getter(Arc::new(|user: &LocalUser| {
                            user.graduation_year.map(|y| y.to_string())
                        })),
                    ),
                ]),
            },
        );

        DesiredStateConfig {
            by_level,
            by_kind,
            user_override: None,
        }
    }

    #[test]
    fn roles_union_across_tiers_dedupes() {
        let resolved = config().resolve_roles(&student());
        assert_eq!(resolved, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn groups_union_across_tiers() {
        let resolved = config().resolve_groups(&student());
        assert_eq!(resolved, BTreeSet::from([10, 20]));
    }

    #[test]
    fn kind_attribute_value_overrides_level_value() {
        let attributes = config().resolve_attributes(&student());
        assert_eq!(attributes.get("department").map(String::as_str), Some("students"));
    }

    #[test]
    fn getter_derives_from_user_record() {
        let attributes = config().resolve_attributes(&student());
        assert_eq!(
            attributes.get("graduation_year").map(String::as_str),
            Some("2027")
        );
    }

    #[test]
    fn explicit_value_beats_getter_on_same_rule() {
        let rule = AttributeRule {
            value: Some("fixed".into()),
            getter: Some(Arc::new(|_| Some("derived".into()))),
        };
        assert_eq!(rule.resolve(&student()).as_deref(), Some("fixed"));
    }

    #[test]
    fn override_closure_wins_last() {
        let mut cfg = config();
        cfg.user_override = Some(Arc::new(|user: &LocalUser| PartialState {
            role_ids: [99].into(),
            group_ids: BTreeSet::new(),
            attributes: BTreeMap::from([(
                "department".to_string(),
                format!("override-{}", user.last_name.to_lowercase()),
            )]),
        }));

        let resolved = cfg.resolve(&student());
        assert!(resolved.role_ids.contains(&99));
        assert_eq!(
            resolved.attributes.get("department").map(String::as_str),
            Some("override-doe")
        );
    }

    #[test]
    fn unconfigured_user_resolves_empty() {
        let mut user = student();
        user.account_level = AccountLevel::Contact;
        user.kind = UserKind::Guardian;
        let resolved = config().resolve(&user);
        assert_eq!(resolved, DesiredState::default());
    }

    #[test]
    fn resolution_is_reproducible() {
        let cfg = config();
        let user = student();
        assert_eq!(cfg.resolve(&user), cfg.resolve(&user));
    }
}
