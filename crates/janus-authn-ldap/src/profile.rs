//! Mapping of directory entries to typed user profiles.

use janus_authn::profile::{ExtendedUserDetails, UserDetails};
use ldap3::SearchEntry;
use std::collections::HashMap;

use crate::config::AttributeMap;
use crate::error::{LdapError, LdapResult};

/// A user entry as read from the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    /// Distinguished name of the entry. Never empty.
    pub dn: String,

    /// Username. The directory must hold exactly one value.
    pub username: String,

    /// Display name, if present.
    pub display_name: Option<String>,

    /// Email addresses.
    pub emails: Vec<String>,

    /// Raw member-of DNs as returned by the directory.
    pub member_of: Vec<String>,
}

impl UserProfile {
    /// Converts the profile into the public details type.
    #[must_use]
    pub fn into_details(self, groups: Vec<String>) -> UserDetails {
        UserDetails {
            username: self.username,
            display_name: self.display_name,
            emails: self.emails,
            groups,
        }
    }
}

/// A user entry with the extended claim attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedUserProfile {
    /// The basic profile.
    pub profile: UserProfile,

    /// Given name.
    pub given_name: Option<String>,

    /// Family name.
    pub family_name: Option<String>,

    /// Middle name.
    pub middle_name: Option<String>,

    /// Nickname.
    pub nickname: Option<String>,

    /// Gender.
    pub gender: Option<String>,

    /// Birthdate.
    pub birthdate: Option<String>,

    /// Website URL.
    pub website: Option<String>,

    /// Picture URL.
    pub picture: Option<String>,

    /// Time zone name.
    pub zone_info: Option<String>,

    /// Locale.
    pub locale: Option<String>,

    /// Phone number.
    pub phone_number: Option<String>,

    /// Phone extension.
    pub phone_extension: Option<String>,

    /// Street address.
    pub street_address: Option<String>,

    /// Locality.
    pub locality: Option<String>,

    /// Region.
    pub region: Option<String>,

    /// Postal code.
    pub postal_code: Option<String>,

    /// Country.
    pub country: Option<String>,

    /// Additional attribute values keyed by configured or override name.
    pub extra: HashMap<String, Vec<String>>,
}

impl ExtendedUserProfile {
    /// Converts the profile into the public details type.
    #[must_use]
    pub fn into_details(self, groups: Vec<String>) -> ExtendedUserDetails {
        ExtendedUserDetails {
            user: self.profile.into_details(groups),
            given_name: self.given_name,
            family_name: self.family_name,
            middle_name: self.middle_name,
            nickname: self.nickname,
            gender: self.gender,
            birthdate: self.birthdate,
            website: self.website,
            picture: self.picture,
            zone_info: self.zone_info,
            locale: self.locale,
            phone_number: self.phone_number,
            phone_extension: self.phone_extension,
            street_address: self.street_address,
            locality: self.locality,
            region: self.region,
            postal_code: self.postal_code,
            country: self.country,
            extra: self.extra,
        }
    }
}

/// Converts raw search entries into typed profiles.
#[derive(Debug, Clone)]
pub struct ProfileMapper {
    attributes: AttributeMap,
}

impl ProfileMapper {
    /// Creates a new mapper for the configured attribute names.
    #[must_use]
    pub const fn new(attributes: AttributeMap) -> Self {
        Self { attributes }
    }

    /// Returns the attribute mapping.
    #[must_use]
    pub const fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Maps an entry to a basic profile.
    ///
    /// ## Errors
    ///
    /// Fails when the entry has an empty DN, or when the username attribute
    /// does not hold exactly one value. Picking an arbitrary value from an
    /// ambiguous mapping would attribute the session to the wrong identity.
    pub fn map_profile(&self, entry: &SearchEntry) -> LdapResult<UserProfile> {
        if entry.dn.is_empty() {
            return Err(LdapError::mapping("directory entry has an empty DN"));
        }

        let username = match entry.attrs.get(self.attributes.username.as_str()) {
            Some(values) if values.len() == 1 => values[0].clone(),
            Some(values) if values.is_empty() => {
                return Err(LdapError::mapping(format!(
                    "entry {} has no value for username attribute {}",
                    entry.dn, self.attributes.username
                )));
            }
            Some(values) => {
                return Err(LdapError::mapping(format!(
                    "entry {} has {} values for username attribute {}",
                    entry.dn,
                    values.len(),
                    self.attributes.username
                )));
            }
            None => {
                return Err(LdapError::mapping(format!(
                    "entry {} has no value for username attribute {}",
                    entry.dn, self.attributes.username
                )));
            }
        };

        Ok(UserProfile {
            dn: entry.dn.clone(),
            username,
            display_name: first_value(entry, &self.attributes.display_name),
            emails: all_values(entry, &self.attributes.mail),
            member_of: all_values(entry, &self.attributes.member_of),
        })
    }

    /// Maps an entry to an extended profile.
    pub fn map_extended_profile(&self, entry: &SearchEntry) -> LdapResult<ExtendedUserProfile> {
        let profile = self.map_profile(entry)?;

        let mut extra = HashMap::new();
        for (attr, override_name) in &self.attributes.extra {
            let values = all_values(entry, attr);
            if values.is_empty() {
                continue;
            }
            let key = override_name.as_deref().unwrap_or(attr.as_str());
            extra.insert(key.to_string(), values);
        }

        Ok(ExtendedUserProfile {
            profile,
            given_name: optional_value(entry, self.attributes.given_name.as_deref()),
            family_name: optional_value(entry, self.attributes.family_name.as_deref()),
            middle_name: optional_value(entry, self.attributes.middle_name.as_deref()),
            nickname: optional_value(entry, self.attributes.nickname.as_deref()),
            gender: optional_value(entry, self.attributes.gender.as_deref()),
            birthdate: optional_value(entry, self.attributes.birthdate.as_deref()),
            website: optional_value(entry, self.attributes.website.as_deref()),
            picture: optional_value(entry, self.attributes.picture.as_deref()),
            zone_info: optional_value(entry, self.attributes.zone_info.as_deref()),
            locale: optional_value(entry, self.attributes.locale.as_deref()),
            phone_number: optional_value(entry, self.attributes.phone_number.as_deref()),
            phone_extension: optional_value(entry, self.attributes.phone_extension.as_deref()),
            street_address: optional_value(entry, self.attributes.street_address.as_deref()),
            locality: optional_value(entry, self.attributes.locality.as_deref()),
            region: optional_value(entry, self.attributes.region.as_deref()),
            postal_code: optional_value(entry, self.attributes.postal_code.as_deref()),
            country: optional_value(entry, self.attributes.country.as_deref()),
            extra,
        })
    }
}

/// First value of an attribute, if any.
fn first_value(entry: &SearchEntry, attr: &str) -> Option<String> {
    entry
        .attrs
        .get(attr)
        .and_then(|values| values.first())
        .cloned()
}

/// First value of an optionally configured attribute.
fn optional_value(entry: &SearchEntry, attr: Option<&str>) -> Option<String> {
    attr.and_then(|attr| first_value(entry, attr))
}

/// All values of an attribute.
fn all_values(entry: &SearchEntry, attr: &str) -> Vec<String> {
    entry.attrs.get(attr).cloned().unwrap_or_default()
}
