//! Password mutation strategies.
//!
//! The strategy is a pure function of the discovered features and the
//! configured implementation flavor, chosen per request from an immutable
//! capability record:
//!
//! 1. The Password Modify extended operation, when the directory
//!    advertises it. The old password is empty for an administrative reset
//!    and populated for a user-initiated change.
//! 2. On Active Directory, a replace of the `unicodePwd` attribute with the
//!    UTF-16LE-encoded quoted password, attaching a policy-hints control
//!    when one was discovered.
//! 3. Otherwise, a plain replace of the `userPassword` attribute.

use std::collections::HashSet;

use ldap3::controls::RawControl;
use ldap3::exop::PasswordModify;
use ldap3::result::LdapResult as OpResult;
use ldap3::{Ldap, Mod};

use crate::config::LdapImplementation;
use crate::error::{LdapError, LdapResult};
use crate::features::{
    SupportedFeatures, OID_CONTROL_MSFT_PWD_POLICY_HINTS,
    OID_CONTROL_MSFT_PWD_POLICY_HINTS_DEPRECATED,
};

/// LDAP result code for invalidCredentials.
pub const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code for constraintViolation.
pub const RC_CONSTRAINT_VIOLATION: u32 = 19;
/// LDAP result code for unwillingToPerform.
pub const RC_UNWILLING_TO_PERFORM: u32 = 53;
/// LDAP result code for objectClassViolation.
pub const RC_OBJECT_CLASS_VIOLATION: u32 = 65;

/// Password attribute replaced on Active Directory.
const ATTR_UNICODE_PWD: &str = "unicodePwd";
/// Password attribute replaced on generic directories.
const ATTR_USER_PASSWORD: &str = "userPassword";

/// BER encoding of `SEQUENCE { INTEGER 1 }`, the value of the policy-hints
/// control requesting that password history and minimum-age policies apply.
const POLICY_HINTS_VALUE: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x01];

/// Which policy-hints control to attach to an Active Directory mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyHints {
    /// The current control.
    Modern,

    /// The deprecated control, advertised by older domain controllers.
    Deprecated,

    /// No hints control was discovered.
    None,
}

impl PolicyHints {
    /// Builds the request control, if one applies.
    #[must_use]
    pub fn control(&self) -> Option<RawControl> {
        let ctype = match self {
            Self::Modern => OID_CONTROL_MSFT_PWD_POLICY_HINTS,
            Self::Deprecated => OID_CONTROL_MSFT_PWD_POLICY_HINTS_DEPRECATED,
            Self::None => return None,
        };

        Some(RawControl {
            ctype: ctype.to_string(),
            crit: true,
            val: Some(POLICY_HINTS_VALUE.to_vec()),
        })
    }
}

/// How a password mutation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStrategy {
    /// RFC 3062 Password Modify extended operation.
    ExtendedOperation,

    /// Active Directory `unicodePwd` replace.
    ActiveDirectory(PolicyHints),

    /// Plain `userPassword` replace.
    ReplaceAttribute,
}

/// Selects the mutation strategy for the discovered capabilities.
#[must_use]
pub fn select_strategy(
    features: &SupportedFeatures,
    implementation: LdapImplementation,
) -> MutationStrategy {
    if features.extensions.password_modify_extended_op {
        return MutationStrategy::ExtendedOperation;
    }

    if implementation.is_active_directory() {
        let hints = if features.controls.msft_pwd_policy_hints {
            PolicyHints::Modern
        } else if features.controls.msft_pwd_policy_hints_deprecated {
            PolicyHints::Deprecated
        } else {
            PolicyHints::None
        };
        return MutationStrategy::ActiveDirectory(hints);
    }

    MutationStrategy::ReplaceAttribute
}

/// Encodes a password for the Active Directory `unicodePwd` attribute:
/// the password surrounded by double quotes, encoded as UTF-16LE.
pub fn encode_ad_password(password: &str) -> LdapResult<Vec<u8>> {
    if password.is_empty() {
        return Err(LdapError::mapping(
            "cannot encode an empty password for unicodePwd",
        ));
    }

    let quoted = format!("\"{password}\"");
    Ok(quoted.encode_utf16().flat_map(u16::to_le_bytes).collect())
}

/// Applies a password mutation and returns the raw directory result.
///
/// The result is returned without interpretation so the caller can detect
/// referral responses and classify failures; `old_password` is `None` for
/// an administrative reset.
pub async fn apply_mutation(
    ldap: &mut Ldap,
    strategy: MutationStrategy,
    user_dn: &str,
    old_password: Option<&str>,
    new_password: &str,
) -> LdapResult<OpResult> {
    match strategy {
        MutationStrategy::ExtendedOperation => {
            let exop = PasswordModify {
                user_id: Some(user_dn),
                old_pass: old_password,
                new_pass: Some(new_password),
            };
            let result = ldap.extended(exop).await?;
            Ok(result.1)
        }
        MutationStrategy::ActiveDirectory(hints) => {
            let encoded = encode_ad_password(new_password)?;
            let mods = vec![Mod::Replace(
                ATTR_UNICODE_PWD.as_bytes().to_vec(),
                HashSet::from([encoded]),
            )];

            let result = match hints.control() {
                Some(control) => ldap.with_controls(control).modify(user_dn, mods).await?,
                None => ldap.modify(user_dn, mods).await?,
            };
            Ok(result)
        }
        MutationStrategy::ReplaceAttribute => {
            let mods = vec![Mod::Replace(
                ATTR_USER_PASSWORD,
                HashSet::from([new_password]),
            )];
            Ok(ldap.modify(user_dn, mods).await?)
        }
    }
}

/// Classifies a non-success mutation result into the domain taxonomy.
///
/// Policy-class result codes become [`LdapError::PasswordPolicy`] and
/// invalid credentials become [`LdapError::InvalidCredentials`]; anything
/// else is an operation failure preserving the raw result code.
#[must_use]
pub fn classify_mutation_failure(
    operation: &'static str,
    address: &str,
    rc: u32,
    text: &str,
) -> LdapError {
    match rc {
        RC_INVALID_CREDENTIALS => LdapError::InvalidCredentials,
        RC_CONSTRAINT_VIOLATION | RC_UNWILLING_TO_PERFORM | RC_OBJECT_CLASS_VIOLATION => {
            LdapError::PasswordPolicy {
                rc,
                message: text.to_string(),
            }
        }
        rc => LdapError::Operation {
            operation,
            address: address.to_string(),
            rc,
            message: text.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Controls, Extensions};

    fn features(extensions: Extensions, controls: Controls) -> SupportedFeatures {
        SupportedFeatures {
            extensions,
            controls,
            ..SupportedFeatures::default()
        }
    }

    #[test]
    fn extended_operation_wins_when_advertised() {
        let features = features(
            Extensions {
                tls: false,
                password_modify_extended_op: true,
            },
            Controls::default(),
        );

        assert_eq!(
            select_strategy(&features, LdapImplementation::ActiveDirectory),
            MutationStrategy::ExtendedOperation
        );
        assert_eq!(
            select_strategy(&features, LdapImplementation::Generic),
            MutationStrategy::ExtendedOperation
        );
    }

    #[test]
    fn active_directory_picks_discovered_hints() {
        let without_exop = Extensions::default();

        let modern = features(
            without_exop,
            Controls {
                msft_pwd_policy_hints: true,
                msft_pwd_policy_hints_deprecated: true,
            },
        );
        assert_eq!(
            select_strategy(&modern, LdapImplementation::ActiveDirectory),
            MutationStrategy::ActiveDirectory(PolicyHints::Modern)
        );

        let deprecated = features(
            without_exop,
            Controls {
                msft_pwd_policy_hints: false,
                msft_pwd_policy_hints_deprecated: true,
            },
        );
        assert_eq!(
            select_strategy(&deprecated, LdapImplementation::ActiveDirectory),
            MutationStrategy::ActiveDirectory(PolicyHints::Deprecated)
        );

        let none = features(without_exop, Controls::default());
        assert_eq!(
            select_strategy(&none, LdapImplementation::ActiveDirectory),
            MutationStrategy::ActiveDirectory(PolicyHints::None)
        );
    }

    #[test]
    fn generic_directory_falls_back_to_replace() {
        let features = features(Extensions::default(), Controls::default());
        assert_eq!(
            select_strategy(&features, LdapImplementation::Generic),
            MutationStrategy::ReplaceAttribute
        );
    }

    #[test]
    fn encodes_quoted_utf16le() {
        let encoded = encode_ad_password("Test123!").unwrap();

        let expected: Vec<u8> = "\"Test123!\""
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        assert_eq!(encoded, expected);

        // First and last UTF-16LE code units are the double quote.
        assert_eq!(&encoded[..2], &[0x22, 0x00]);
        assert_eq!(&encoded[encoded.len() - 2..], &[0x22, 0x00]);
    }

    #[test]
    fn rejects_empty_password_encoding() {
        assert!(encode_ad_password("").is_err());
    }

    #[test]
    fn encodes_non_ascii_passwords() {
        let encoded = encode_ad_password("Pässwörd!").unwrap();
        assert_eq!(encoded.len() % 2, 0);
    }

    #[test]
    fn policy_hints_controls_carry_ber_value() {
        let control = PolicyHints::Modern.control().unwrap();
        assert_eq!(control.ctype, OID_CONTROL_MSFT_PWD_POLICY_HINTS);
        assert!(control.crit);
        assert_eq!(control.val.as_deref(), Some(&POLICY_HINTS_VALUE[..]));

        let control = PolicyHints::Deprecated.control().unwrap();
        assert_eq!(control.ctype, OID_CONTROL_MSFT_PWD_POLICY_HINTS_DEPRECATED);

        assert!(PolicyHints::None.control().is_none());
    }

    #[test]
    fn classifies_policy_failures() {
        for rc in [
            RC_CONSTRAINT_VIOLATION,
            RC_UNWILLING_TO_PERFORM,
            RC_OBJECT_CLASS_VIOLATION,
        ] {
            let err = classify_mutation_failure("password modify", "ldap://x:389", rc, "denied");
            assert!(matches!(err, LdapError::PasswordPolicy { .. }));
        }
    }

    #[test]
    fn classifies_invalid_credentials() {
        let err = classify_mutation_failure("password modify", "ldap://x:389", 49, "bad");
        assert!(matches!(err, LdapError::InvalidCredentials));
    }

    #[test]
    fn other_codes_preserve_rc() {
        let err = classify_mutation_failure("password modify", "ldap://x:389", 50, "denied");
        match err {
            LdapError::Operation { rc, .. } => assert_eq!(rc, 50),
            other => panic!("unexpected error: {other}"),
        }
    }
}
