//! Identity assertion projection for federated sign-on.
//!
//! The remote service consumes identities it does not authenticate
//! itself; this module projects a local user into the attribute bundle a
//! sign-on assertion carries. Separate from provisioning: an assertion is
//! built per sign-on, a push job is run per batch.

use serde::{Deserialize, Serialize};

use crate::model::LocalUser;

/// Name-ID format carried on every assertion this connector emits.
pub const NAME_ID_FORMAT: &str = "persistent";

/// The attribute bundle asserted about a user at sign-on time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAssertion {
    pub name_id_format: String,
    /// Stable subject identifier; the user's email address.
    pub name_id_value: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl IdentityAssertion {
    /// Project a local user into an assertion.
    ///
    /// Returns `None` for users without an email address: they have no
    /// stable subject identifier and cannot sign on.
    #[must_use]
    pub fn for_user(user: &LocalUser) -> Option<Self> {
        let email = user.email.as_deref().filter(|e| !e.is_empty())?;
        Some(Self {
            name_id_format: NAME_ID_FORMAT.to_string(),
            name_id_value: email.to_string(),
            email: email.to_string(),
            first_name: user.desired_first_name().to_string(),
            last_name: user.last_name.clone(),
        })
    }
}
