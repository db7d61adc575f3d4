//! LDAP provider configuration.
//!
//! Configuration is validated once at build time; everything derived from it
//! (the directory address, resolved filter templates, effective search base
//! DNs) is computed at provider construction and immutable afterwards.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LdapError, LdapResult};

// ============================================================================
// Directory Address
// ============================================================================

/// URL scheme for a directory connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressScheme {
    /// Plain LDAP, optionally upgraded with StartTLS.
    #[default]
    Ldap,

    /// LDAP over TLS from connection start.
    Ldaps,
}

impl AddressScheme {
    /// Returns the scheme string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ldap => "ldap",
            Self::Ldaps => "ldaps",
        }
    }

    /// Returns the default port for the scheme.
    #[must_use]
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::Ldap => 389,
            Self::Ldaps => 636,
        }
    }
}

/// A directory server address: scheme, host and port.
///
/// Parsed once from the configured URL (or from a referral URL) and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryAddress {
    /// Connection scheme.
    pub scheme: AddressScheme,

    /// Server host name or IP address.
    pub host: String,

    /// Server port.
    pub port: u16,
}

impl DirectoryAddress {
    /// Parses an address from an `ldap://` or `ldaps://` URL.
    pub fn parse(raw: &str) -> LdapResult<Self> {
        let url = Url::parse(raw)
            .map_err(|e| LdapError::config(format!("invalid directory URL {raw:?}: {e}")))?;

        let scheme = match url.scheme() {
            "ldap" => AddressScheme::Ldap,
            "ldaps" => AddressScheme::Ldaps,
            other => {
                return Err(LdapError::config(format!(
                    "unsupported directory URL scheme {other:?}, expected ldap or ldaps"
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| LdapError::config(format!("directory URL {raw:?} has no host")))?
            .to_string();

        Ok(Self {
            scheme,
            host,
            port: url.port().unwrap_or_else(|| scheme.default_port()),
        })
    }

    /// Renders the address back to a URL string for dialing.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl fmt::Display for DirectoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

// ============================================================================
// Implementation Flavor
// ============================================================================

/// Known directory server implementations.
///
/// The flavor changes password-mutation behavior, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LdapImplementation {
    /// Generic RFC 4510 compliant directory.
    #[default]
    Generic,

    /// Microsoft Active Directory.
    ActiveDirectory,
}

impl LdapImplementation {
    /// Returns true for Active Directory.
    #[must_use]
    pub const fn is_active_directory(&self) -> bool {
        matches!(self, Self::ActiveDirectory)
    }
}

// ============================================================================
// Group Search Mode
// ============================================================================

/// Strategy used to resolve a user's group memberships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupSearchMode {
    /// Search group entries with the resolved groups filter.
    #[default]
    Filter,

    /// Search candidate entries, then cross-check each candidate's DN
    /// against the user's member-of attribute values.
    MemberOf,
}

// ============================================================================
// Attribute Mapping
// ============================================================================

/// Directory attribute names for each profile role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMap {
    /// Attribute carrying an entry's own distinguished name, for filter
    /// templates that match on it.
    pub distinguished_name: String,

    /// Username attribute. Must hold exactly one value per user entry.
    pub username: String,

    /// Display name attribute.
    pub display_name: String,

    /// Mail attribute (may be multi-valued).
    pub mail: String,

    /// Member-of attribute on user entries, listing group DNs.
    pub member_of: String,

    /// Group name attribute on group entries. Must hold exactly one value.
    pub group_name: String,

    /// Member attribute on group entries, listing user DNs.
    pub group_member: String,

    /// Given name attribute for extended details.
    pub given_name: Option<String>,

    /// Family name attribute for extended details.
    pub family_name: Option<String>,

    /// Middle name attribute for extended details.
    pub middle_name: Option<String>,

    /// Nickname attribute for extended details.
    pub nickname: Option<String>,

    /// Gender attribute for extended details.
    pub gender: Option<String>,

    /// Birthdate attribute for extended details.
    pub birthdate: Option<String>,

    /// Website attribute for extended details.
    pub website: Option<String>,

    /// Picture attribute for extended details.
    pub picture: Option<String>,

    /// Time zone attribute for extended details.
    pub zone_info: Option<String>,

    /// Locale attribute for extended details.
    pub locale: Option<String>,

    /// Phone number attribute for extended details.
    pub phone_number: Option<String>,

    /// Phone extension attribute for extended details.
    pub phone_extension: Option<String>,

    /// Street address attribute for extended details.
    pub street_address: Option<String>,

    /// Locality attribute for extended details.
    pub locality: Option<String>,

    /// Region attribute for extended details.
    pub region: Option<String>,

    /// Postal code attribute for extended details.
    pub postal_code: Option<String>,

    /// Country attribute for extended details.
    pub country: Option<String>,

    /// Arbitrary additional attributes to fetch for extended details.
    ///
    /// Keyed by directory attribute name; the value is an optional override
    /// for the key under which the values appear in the result.
    pub extra: HashMap<String, Option<String>>,
}

impl Default for AttributeMap {
    fn default() -> Self {
        Self {
            distinguished_name: "distinguishedName".to_string(),
            username: "uid".to_string(),
            display_name: "displayName".to_string(),
            mail: "mail".to_string(),
            member_of: "memberOf".to_string(),
            group_name: "cn".to_string(),
            group_member: "member".to_string(),
            given_name: None,
            family_name: None,
            middle_name: None,
            nickname: None,
            gender: None,
            birthdate: None,
            website: None,
            picture: None,
            zone_info: None,
            locale: None,
            phone_number: None,
            phone_extension: None,
            street_address: None,
            locality: None,
            region: None,
            postal_code: None,
            country: None,
            extra: HashMap::new(),
        }
    }
}

impl AttributeMap {
    /// Attributes requested for a basic profile lookup.
    #[must_use]
    pub fn profile_attributes(&self) -> Vec<String> {
        vec![
            self.username.clone(),
            self.display_name.clone(),
            self.mail.clone(),
            self.member_of.clone(),
        ]
    }

    /// Attributes requested for an extended profile lookup.
    ///
    /// The basic set plus every configured claim attribute and the extra
    /// attribute names.
    #[must_use]
    pub fn extended_attributes(&self) -> Vec<String> {
        let mut attrs = self.profile_attributes();

        for attr in [
            &self.given_name,
            &self.family_name,
            &self.middle_name,
            &self.nickname,
            &self.gender,
            &self.birthdate,
            &self.website,
            &self.picture,
            &self.zone_info,
            &self.locale,
            &self.phone_number,
            &self.phone_extension,
            &self.street_address,
            &self.locality,
            &self.region,
            &self.postal_code,
            &self.country,
        ]
        .into_iter()
        .flatten()
        {
            attrs.push(attr.clone());
        }

        attrs.extend(self.extra.keys().cloned());
        attrs
    }
}

// ============================================================================
// TLS
// ============================================================================

/// TLS settings for directory connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Upgrade a plain `ldap` connection with StartTLS after connect.
    pub start_tls: bool,

    /// Skip server certificate verification. Never enable in production.
    pub skip_verify: bool,
}

// ============================================================================
// Pooling
// ============================================================================

/// Connection pooling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolingConfig {
    /// Whether to reuse service-account connections across requests.
    pub enabled: bool,

    /// Maximum service-account clients checked out at once.
    pub max_size: usize,

    /// Idle clients older than this are closed and evicted lazily on the
    /// next acquisition.
    pub max_idle_time: Duration,
}

impl Default for PoolingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size: 8,
            max_idle_time: Duration::from_secs(300),
        }
    }
}

// ============================================================================
// LDAP Configuration
// ============================================================================

/// Full configuration for the directory authentication provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Directory server URL (`ldap://` or `ldaps://`).
    pub url: String,

    /// Directory implementation flavor.
    pub implementation: LdapImplementation,

    /// TLS settings.
    pub tls: TlsConfig,

    /// Service account bind DN. Empty for anonymous binds.
    pub bind_dn: String,

    /// Service account bind password.
    #[serde(skip_serializing)]
    pub bind_password: String,

    /// Base DN for all searches.
    pub base_dn: String,

    /// Additional DN prefixed to the base DN for user searches.
    pub additional_users_dn: Option<String>,

    /// Additional DN prefixed to the base DN for group searches.
    pub additional_groups_dn: Option<String>,

    /// Users filter template, with attribute-role and value placeholders.
    pub users_filter: String,

    /// Groups filter template, with attribute-role and value placeholders.
    pub groups_filter: String,

    /// Group resolution strategy.
    pub group_search_mode: GroupSearchMode,

    /// Whether to chase referral responses.
    pub permit_referrals: bool,

    /// Attribute name mapping.
    pub attributes: AttributeMap,

    /// Connection pooling.
    pub pooling: PoolingConfig,

    /// Dial timeout.
    pub connect_timeout: Duration,

    /// Per-operation timeout for searches and modifies.
    pub operation_timeout: Duration,
}

impl LdapConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> LdapConfigBuilder {
        LdapConfigBuilder::new()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> LdapResult<()> {
        let address = DirectoryAddress::parse(&self.url)?;

        if self.tls.start_tls && address.scheme == AddressScheme::Ldaps {
            return Err(LdapError::config(
                "start_tls cannot be combined with an ldaps:// URL",
            ));
        }

        if self.base_dn.is_empty() {
            return Err(LdapError::config("base_dn cannot be empty"));
        }

        if self.users_filter.is_empty() {
            return Err(LdapError::config("users_filter cannot be empty"));
        }

        if self.groups_filter.is_empty() {
            return Err(LdapError::config("groups_filter cannot be empty"));
        }

        if self.bind_dn.is_empty() && !self.bind_password.is_empty() {
            return Err(LdapError::config(
                "bind_password is set but bind_dn is empty",
            ));
        }

        if self.pooling.enabled && self.pooling.max_size == 0 {
            return Err(LdapError::config("pooling.max_size must be at least 1"));
        }

        Ok(())
    }

    /// Parses the configured directory address.
    pub fn address(&self) -> LdapResult<DirectoryAddress> {
        DirectoryAddress::parse(&self.url)
    }

    /// Effective base DN for user searches.
    #[must_use]
    pub fn users_base_dn(&self) -> String {
        join_dn(self.additional_users_dn.as_deref(), &self.base_dn)
    }

    /// Effective base DN for group searches.
    #[must_use]
    pub fn groups_base_dn(&self) -> String {
        join_dn(self.additional_groups_dn.as_deref(), &self.base_dn)
    }
}

/// Joins an optional DN prefix onto a base DN.
fn join_dn(prefix: Option<&str>, base: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p},{base}"),
        _ => base.to_string(),
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for [`LdapConfig`].
#[derive(Debug, Default)]
pub struct LdapConfigBuilder {
    url: Option<String>,
    implementation: LdapImplementation,
    tls: TlsConfig,
    bind_dn: String,
    bind_password: String,
    base_dn: Option<String>,
    additional_users_dn: Option<String>,
    additional_groups_dn: Option<String>,
    users_filter: Option<String>,
    groups_filter: Option<String>,
    group_search_mode: GroupSearchMode,
    permit_referrals: bool,
    attributes: Option<AttributeMap>,
    pooling: PoolingConfig,
    connect_timeout: Option<Duration>,
    operation_timeout: Option<Duration>,
}

impl LdapConfigBuilder {
    /// Creates a new builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the implementation flavor.
    #[must_use]
    pub const fn implementation(mut self, implementation: LdapImplementation) -> Self {
        self.implementation = implementation;
        self
    }

    /// Sets the TLS settings.
    #[must_use]
    pub const fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Sets the service account bind identity.
    #[must_use]
    pub fn bind(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.bind_dn = dn.into();
        self.bind_password = password.into();
        self
    }

    /// Sets the base DN.
    #[must_use]
    pub fn base_dn(mut self, dn: impl Into<String>) -> Self {
        self.base_dn = Some(dn.into());
        self
    }

    /// Sets the additional users DN.
    #[must_use]
    pub fn additional_users_dn(mut self, dn: impl Into<String>) -> Self {
        self.additional_users_dn = Some(dn.into());
        self
    }

    /// Sets the additional groups DN.
    #[must_use]
    pub fn additional_groups_dn(mut self, dn: impl Into<String>) -> Self {
        self.additional_groups_dn = Some(dn.into());
        self
    }

    /// Sets the users filter template.
    #[must_use]
    pub fn users_filter(mut self, filter: impl Into<String>) -> Self {
        self.users_filter = Some(filter.into());
        self
    }

    /// Sets the groups filter template.
    #[must_use]
    pub fn groups_filter(mut self, filter: impl Into<String>) -> Self {
        self.groups_filter = Some(filter.into());
        self
    }

    /// Sets the group search mode.
    #[must_use]
    pub const fn group_search_mode(mut self, mode: GroupSearchMode) -> Self {
        self.group_search_mode = mode;
        self
    }

    /// Permits referral chasing.
    #[must_use]
    pub const fn permit_referrals(mut self, permit: bool) -> Self {
        self.permit_referrals = permit;
        self
    }

    /// Sets the attribute mapping.
    #[must_use]
    pub fn attributes(mut self, attributes: AttributeMap) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Sets the pooling configuration.
    #[must_use]
    pub const fn pooling(mut self, pooling: PoolingConfig) -> Self {
        self.pooling = pooling;
        self
    }

    /// Sets the dial timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the per-operation timeout.
    #[must_use]
    pub const fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> LdapResult<LdapConfig> {
        let config = LdapConfig {
            url: self
                .url
                .ok_or_else(|| LdapError::config("url is required"))?,
            implementation: self.implementation,
            tls: self.tls,
            bind_dn: self.bind_dn,
            bind_password: self.bind_password,
            base_dn: self
                .base_dn
                .ok_or_else(|| LdapError::config("base_dn is required"))?,
            additional_users_dn: self.additional_users_dn,
            additional_groups_dn: self.additional_groups_dn,
            users_filter: self
                .users_filter
                .ok_or_else(|| LdapError::config("users_filter is required"))?,
            groups_filter: self
                .groups_filter
                .ok_or_else(|| LdapError::config("groups_filter is required"))?,
            group_search_mode: self.group_search_mode,
            permit_referrals: self.permit_referrals,
            attributes: self.attributes.unwrap_or_default(),
            pooling: self.pooling,
            connect_timeout: self.connect_timeout.unwrap_or(Duration::from_secs(5)),
            operation_timeout: self.operation_timeout.unwrap_or(Duration::from_secs(30)),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> LdapConfigBuilder {
        LdapConfig::builder()
            .url("ldap://ldap.example.com")
            .bind("cn=admin,dc=example,dc=com", "password")
            .base_dn("dc=example,dc=com")
            .users_filter("(&(objectClass=person)({username_attribute}={input}))")
            .groups_filter("(&(objectClass=groupOfNames)(member={dn}))")
    }

    #[test]
    fn parses_address_with_default_ports() {
        let addr = DirectoryAddress::parse("ldap://ldap.example.com").unwrap();
        assert_eq!(addr.scheme, AddressScheme::Ldap);
        assert_eq!(addr.port, 389);

        let addr = DirectoryAddress::parse("ldaps://ldap.example.com").unwrap();
        assert_eq!(addr.scheme, AddressScheme::Ldaps);
        assert_eq!(addr.port, 636);

        let addr = DirectoryAddress::parse("ldaps://ldap.example.com:3636").unwrap();
        assert_eq!(addr.port, 3636);
        assert_eq!(addr.url(), "ldaps://ldap.example.com:3636");
    }

    #[test]
    fn rejects_non_ldap_scheme() {
        assert!(DirectoryAddress::parse("http://example.com").is_err());
    }

    #[test]
    fn builds_minimal_config() {
        let config = minimal().build().unwrap();
        assert_eq!(config.attributes.username, "uid");
        assert!(!config.permit_referrals);
        assert_eq!(config.users_base_dn(), "dc=example,dc=com");
    }

    #[test]
    fn rejects_starttls_over_ldaps() {
        let result = minimal()
            .url("ldaps://ldap.example.com")
            .tls(TlsConfig {
                start_tls: true,
                skip_verify: false,
            })
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn rejects_password_without_bind_dn() {
        let result = minimal().bind("", "secret").build();
        assert!(result.is_err());
    }

    #[test]
    fn joins_additional_dns() {
        let config = minimal()
            .additional_users_dn("ou=users")
            .additional_groups_dn("ou=groups")
            .build()
            .unwrap();

        assert_eq!(config.users_base_dn(), "ou=users,dc=example,dc=com");
        assert_eq!(config.groups_base_dn(), "ou=groups,dc=example,dc=com");
    }

    #[test]
    fn extended_attributes_include_extra_names() {
        let mut attributes = AttributeMap {
            given_name: Some("givenName".to_string()),
            ..AttributeMap::default()
        };
        attributes
            .extra
            .insert("employeeNumber".to_string(), Some("employee_id".to_string()));

        let attrs = attributes.extended_attributes();
        assert!(attrs.contains(&"uid".to_string()));
        assert!(attrs.contains(&"givenName".to_string()));
        assert!(attrs.contains(&"employeeNumber".to_string()));
        assert!(!attrs.contains(&"sn".to_string()));
    }
}
