//! Typed user details returned by identity backends.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Basic details for an authenticated identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    /// Canonical username as stored by the backend.
    pub username: String,

    /// Human-readable display name, if the backend records one.
    pub display_name: Option<String>,

    /// Email addresses, primary first.
    pub emails: Vec<String>,

    /// Flat group-name membership list, deduplicated, order-preserving.
    pub groups: Vec<String>,
}

impl UserDetails {
    /// Returns the primary email, if any.
    #[must_use]
    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(String::as_str)
    }

    /// Checks membership of a group by exact name.
    #[must_use]
    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Extended details carrying identity-token-style claims.
///
/// Every claim is optional; backends populate only what they are configured
/// to map. The `extra` map holds arbitrary additional attributes keyed by
/// the configured attribute name or its override name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedUserDetails {
    /// The basic details.
    #[serde(flatten)]
    pub user: UserDetails,

    /// Given (first) name.
    pub given_name: Option<String>,

    /// Family (last) name.
    pub family_name: Option<String>,

    /// Middle name.
    pub middle_name: Option<String>,

    /// Nickname.
    pub nickname: Option<String>,

    /// Gender.
    pub gender: Option<String>,

    /// Birthdate, as stored.
    pub birthdate: Option<String>,

    /// Personal website URL.
    pub website: Option<String>,

    /// Profile picture URL.
    pub picture: Option<String>,

    /// Time zone name.
    pub zone_info: Option<String>,

    /// Locale, e.g. `en-US`.
    pub locale: Option<String>,

    /// Telephone number.
    pub phone_number: Option<String>,

    /// Telephone extension.
    pub phone_extension: Option<String>,

    /// Street address.
    pub street_address: Option<String>,

    /// City or locality.
    pub locality: Option<String>,

    /// State, province or region.
    pub region: Option<String>,

    /// Postal code.
    pub postal_code: Option<String>,

    /// Country.
    pub country: Option<String>,

    /// Additional attributes keyed by configured name or override name.
    pub extra: HashMap<String, Vec<String>>,
}
