//! Directory capability discovery.
//!
//! A single base-scope search against the root DSE reads the
//! `supportedControl` and `supportedExtension` operational attributes. The
//! advertised OIDs gate which password-mutation strategy is used and which
//! password-policy hint control is attached. Discovery runs once per client
//! factory; the result is immutable afterwards.

use ldap3::{Ldap, Scope, SearchEntry};
use tracing::debug;

use crate::error::{LdapError, LdapResult};

/// OID of the Password Modify extended operation (RFC 3062).
pub const OID_EXTENSION_PWD_MODIFY: &str = "1.3.6.1.4.1.4203.1.11.1";

/// OID of the StartTLS extended operation (RFC 4511).
pub const OID_EXTENSION_TLS: &str = "1.3.6.1.4.1.1466.20037";

/// OID of the Microsoft server policy hints control.
pub const OID_CONTROL_MSFT_PWD_POLICY_HINTS: &str = "1.2.840.113556.1.4.2239";

/// OID of the deprecated Microsoft server policy hints control.
pub const OID_CONTROL_MSFT_PWD_POLICY_HINTS_DEPRECATED: &str = "1.2.840.113556.1.4.2066";

/// Extended operations advertised by the directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extensions {
    /// StartTLS extended operation.
    pub tls: bool,

    /// Password Modify extended operation.
    pub password_modify_extended_op: bool,
}

/// Request controls advertised by the directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Controls {
    /// Microsoft server policy hints control.
    pub msft_pwd_policy_hints: bool,

    /// Deprecated Microsoft server policy hints control.
    pub msft_pwd_policy_hints_deprecated: bool,
}

/// Capabilities discovered from the root DSE.
///
/// A feature flag is set only when its OID is present in the corresponding
/// raw list; unknown OIDs are preserved for diagnostics but change nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedFeatures {
    /// Recognized extended operations.
    pub extensions: Extensions,

    /// Recognized request controls.
    pub controls: Controls,

    /// Every advertised extension OID, unchanged.
    pub raw_extensions: Vec<String>,

    /// Every advertised control OID, unchanged.
    pub raw_controls: Vec<String>,
}

impl SupportedFeatures {
    /// Builds the feature record from discovered OID lists.
    #[must_use]
    pub fn from_oid_lists(controls: Vec<String>, extensions: Vec<String>) -> Self {
        let mut features = Self {
            raw_controls: controls,
            raw_extensions: extensions,
            ..Self::default()
        };

        for oid in &features.raw_extensions {
            match oid.as_str() {
                OID_EXTENSION_TLS => features.extensions.tls = true,
                OID_EXTENSION_PWD_MODIFY => {
                    features.extensions.password_modify_extended_op = true;
                }
                _ => {}
            }
        }

        for oid in &features.raw_controls {
            match oid.as_str() {
                OID_CONTROL_MSFT_PWD_POLICY_HINTS => {
                    features.controls.msft_pwd_policy_hints = true;
                }
                OID_CONTROL_MSFT_PWD_POLICY_HINTS_DEPRECATED => {
                    features.controls.msft_pwd_policy_hints_deprecated = true;
                }
                _ => {}
            }
        }

        features
    }
}

/// Queries the root DSE for supported controls and extensions.
pub async fn discover(ldap: &mut Ldap, address: &str) -> LdapResult<SupportedFeatures> {
    let (rs, _result) = ldap
        .search(
            "",
            Scope::Base,
            "(objectClass=*)",
            vec!["supportedControl", "supportedExtension"],
        )
        .await?
        .success()
        .map_err(|e| LdapError::Operation {
            operation: "feature discovery",
            address: address.to_string(),
            rc: 0,
            message: e.to_string(),
        })?;

    let Some(entry) = rs.into_iter().next().map(SearchEntry::construct) else {
        debug!(address, "root DSE returned no entry, assuming no optional features");
        return Ok(SupportedFeatures::default());
    };

    let controls = entry
        .attrs
        .get("supportedControl")
        .cloned()
        .unwrap_or_default();
    let extensions = entry
        .attrs
        .get("supportedExtension")
        .cloned()
        .unwrap_or_default();

    let features = SupportedFeatures::from_oid_lists(controls, extensions);

    debug!(
        address,
        pwd_modify = features.extensions.password_modify_extended_op,
        tls = features.extensions.tls,
        policy_hints = features.controls.msft_pwd_policy_hints,
        "discovered directory capabilities"
    );

    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_oid_alone_sets_only_tls() {
        let extensions = vec![OID_EXTENSION_TLS.to_string()];
        let features = SupportedFeatures::from_oid_lists(vec![], extensions.clone());

        assert!(features.extensions.tls);
        assert!(!features.extensions.password_modify_extended_op);
        assert_eq!(features.raw_extensions, extensions);
        assert!(features.raw_controls.is_empty());
    }

    #[test]
    fn unknown_oids_are_preserved_without_effect() {
        let controls = vec!["1.2.3.4.5".to_string()];
        let extensions = vec!["9.8.7".to_string()];
        let features = SupportedFeatures::from_oid_lists(controls.clone(), extensions.clone());

        assert_eq!(features.extensions, Extensions::default());
        assert_eq!(features.controls, Controls::default());
        assert_eq!(features.raw_controls, controls);
        assert_eq!(features.raw_extensions, extensions);
    }

    #[test]
    fn recognizes_password_modify_and_policy_hints() {
        let features = SupportedFeatures::from_oid_lists(
            vec![
                OID_CONTROL_MSFT_PWD_POLICY_HINTS.to_string(),
                OID_CONTROL_MSFT_PWD_POLICY_HINTS_DEPRECATED.to_string(),
            ],
            vec![OID_EXTENSION_PWD_MODIFY.to_string()],
        );

        assert!(features.extensions.password_modify_extended_op);
        assert!(features.controls.msft_pwd_policy_hints);
        assert!(features.controls.msft_pwd_policy_hints_deprecated);
    }

    #[test]
    fn flag_implies_oid_presence() {
        let features = SupportedFeatures::from_oid_lists(
            vec![OID_CONTROL_MSFT_PWD_POLICY_HINTS.to_string()],
            vec![OID_EXTENSION_TLS.to_string()],
        );

        if features.extensions.tls {
            assert!(features
                .raw_extensions
                .iter()
                .any(|o| o == OID_EXTENSION_TLS));
        }
        if features.controls.msft_pwd_policy_hints {
            assert!(features
                .raw_controls
                .iter()
                .any(|o| o == OID_CONTROL_MSFT_PWD_POLICY_HINTS));
        }
    }
}
