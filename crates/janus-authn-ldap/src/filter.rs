//! Search filter templates.
//!
//! Filter templates are resolved in two stages. At construction time every
//! attribute-role placeholder (`{username_attribute}` and friends) is
//! replaced with the configured attribute name and the template is scanned
//! for the value placeholders it still contains. At request time only the
//! recorded value placeholders are substituted, with untrusted input escaped
//! before it is spliced into the filter string.
//!
//! ## Security
//!
//! Escaping before substitution is the injection defense for this
//! subsystem. Raw request input receives full escaping (RFC 4515
//! metacharacters plus the DN-reserved characters); values read back from
//! the directory (DNs, usernames) receive RFC 4515 escaping only.

use chrono::{DateTime, Utc};

use crate::config::AttributeMap;

/// Placeholder substituted with the escaped raw request input.
const PLACEHOLDER_INPUT: &str = "{input}";
/// Placeholder substituted with the profile's username.
const PLACEHOLDER_USERNAME: &str = "{username}";
/// Placeholder substituted with the profile's distinguished name.
const PLACEHOLDER_DN: &str = "{dn}";
/// Placeholder expanded to one `(attr=dn)` term per member-of value.
const PLACEHOLDER_MEMBER_OF_DN: &str = "{memberof:dn}";
/// Placeholder expanded to one `(attr=rdn)` term per member-of value.
const PLACEHOLDER_MEMBER_OF_RDN: &str = "{memberof:rdn}";
/// Placeholder substituted with the request time in generalized-time form.
const PLACEHOLDER_TIME_GENERALIZED: &str = "{date-time:generalized}";
/// Placeholder substituted with the request time as unix epoch seconds.
const PLACEHOLDER_TIME_UNIX: &str = "{date-time:unix-epoch}";
/// Placeholder substituted with the request time as a Microsoft NT epoch.
const PLACEHOLDER_TIME_NT: &str = "{date-time:microsoft-nt}";

/// Seconds between the NT epoch (1601-01-01) and the unix epoch.
const NT_EPOCH_OFFSET_SECONDS: i64 = 11_644_473_600;

/// Escapes a value for splicing into a search filter, per RFC 4515.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\5c"),
            '*' => result.push_str("\\2a"),
            '(' => result.push_str("\\28"),
            ')' => result.push_str("\\29"),
            '\0' => result.push_str("\\00"),
            _ => result.push(c),
        }
    }
    result
}

/// Escapes untrusted request input for splicing into a search filter.
///
/// On top of RFC 4515 escaping, the DN-reserved characters
/// `, # + < > ; " =` are backslash-escaped so user input can never alter
/// the shape of a DN-valued assertion.
#[must_use]
pub fn escape_input(value: &str) -> String {
    let escaped = escape_filter_value(value);
    let mut result = String::with_capacity(escaped.len());
    for c in escaped.chars() {
        match c {
            ',' | '#' | '+' | '<' | '>' | ';' | '"' | '=' => {
                result.push('\\');
                result.push(c);
            }
            _ => result.push(c),
        }
    }
    result
}

/// Returns the first RDN component of a DN, honoring escaped commas.
#[must_use]
pub fn first_rdn(dn: &str) -> &str {
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            '\\' => escaped = !escaped,
            ',' if !escaped => return &dn[..i],
            _ => escaped = false,
        }
    }
    dn
}

/// Value placeholders present in a resolved template.
///
/// Recorded once at construction so per-request resolution substitutes only
/// what is actually needed. This matters for correctness, not just speed: a
/// profile with no member-of values must not run a member-of expansion that
/// would produce a malformed filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValuePlaceholders {
    /// `{input}` is present.
    pub input: bool,
    /// `{username}` is present.
    pub username: bool,
    /// `{dn}` is present.
    pub dn: bool,
    /// `{memberof:dn}` is present.
    pub member_of_dn: bool,
    /// `{memberof:rdn}` is present.
    pub member_of_rdn: bool,
    /// `{date-time:generalized}` is present.
    pub generalized_time: bool,
    /// `{date-time:unix-epoch}` is present.
    pub unix_epoch: bool,
    /// `{date-time:microsoft-nt}` is present.
    pub nt_epoch: bool,
}

/// A filter template with attribute-role placeholders already substituted.
#[derive(Debug, Clone)]
pub struct FilterTemplate {
    template: String,
    placeholders: ValuePlaceholders,
    member_of_attribute: String,
}

impl FilterTemplate {
    /// Resolves the attribute-role placeholders of a configured template.
    #[must_use]
    pub fn resolve(template: &str, attributes: &AttributeMap) -> Self {
        let template = template
            .replace(
                "{distinguished_name_attribute}",
                &attributes.distinguished_name,
            )
            .replace("{username_attribute}", &attributes.username)
            .replace("{display_name_attribute}", &attributes.display_name)
            .replace("{mail_attribute}", &attributes.mail)
            .replace("{member_of_attribute}", &attributes.member_of)
            .replace("{group_name_attribute}", &attributes.group_name)
            .replace("{group_member_attribute}", &attributes.group_member);

        let placeholders = ValuePlaceholders {
            input: template.contains(PLACEHOLDER_INPUT),
            username: template.contains(PLACEHOLDER_USERNAME),
            dn: template.contains(PLACEHOLDER_DN),
            member_of_dn: template.contains(PLACEHOLDER_MEMBER_OF_DN),
            member_of_rdn: template.contains(PLACEHOLDER_MEMBER_OF_RDN),
            generalized_time: template.contains(PLACEHOLDER_TIME_GENERALIZED),
            unix_epoch: template.contains(PLACEHOLDER_TIME_UNIX),
            nt_epoch: template.contains(PLACEHOLDER_TIME_NT),
        };

        Self {
            template,
            placeholders,
            member_of_attribute: attributes.member_of.clone(),
        }
    }

    /// Returns the resolved template string.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns the recorded value placeholders.
    #[must_use]
    pub const fn placeholders(&self) -> &ValuePlaceholders {
        &self.placeholders
    }

    /// Resolves the template for a user lookup.
    #[must_use]
    pub fn resolve_user_query(&self, input: &str, now: DateTime<Utc>) -> String {
        let mut filter = self.template.clone();

        if self.placeholders.input {
            filter = filter.replace(PLACEHOLDER_INPUT, &escape_input(input));
        }

        self.substitute_times(&mut filter, now);

        filter
    }

    /// Resolves the template for a group lookup against a known user.
    ///
    /// `input` is the raw request input; `username`, `dn` and `member_of`
    /// come from the previously retrieved user profile.
    #[must_use]
    pub fn resolve_group_query(
        &self,
        input: &str,
        username: &str,
        dn: &str,
        member_of: &[String],
        now: DateTime<Utc>,
    ) -> String {
        let mut filter = self.template.clone();

        if self.placeholders.input {
            filter = filter.replace(PLACEHOLDER_INPUT, &escape_input(input));
        }

        if self.placeholders.username {
            filter = filter.replace(PLACEHOLDER_USERNAME, &escape_filter_value(username));
        }

        if self.placeholders.dn {
            filter = filter.replace(PLACEHOLDER_DN, &escape_filter_value(dn));
        }

        if self.placeholders.member_of_dn {
            let terms = self.member_of_terms(member_of, |dn| dn);
            filter = filter.replace(PLACEHOLDER_MEMBER_OF_DN, &terms);
        }

        if self.placeholders.member_of_rdn {
            let terms = self.member_of_terms(member_of, first_rdn);
            filter = filter.replace(PLACEHOLDER_MEMBER_OF_RDN, &terms);
        }

        self.substitute_times(&mut filter, now);

        filter
    }

    /// Builds the `(attr=value)` term list for a member-of expansion.
    fn member_of_terms<'a>(
        &self,
        member_of: &'a [String],
        project: impl Fn(&'a str) -> &'a str,
    ) -> String {
        let mut terms = String::new();
        for dn in member_of {
            terms.push('(');
            terms.push_str(&self.member_of_attribute);
            terms.push('=');
            terms.push_str(&escape_filter_value(project(dn)));
            terms.push(')');
        }
        terms
    }

    fn substitute_times(&self, filter: &mut String, now: DateTime<Utc>) {
        if self.placeholders.generalized_time {
            *filter = filter.replace(
                PLACEHOLDER_TIME_GENERALIZED,
                &now.format("%Y%m%d%H%M%SZ").to_string(),
            );
        }

        if self.placeholders.unix_epoch {
            *filter = filter.replace(PLACEHOLDER_TIME_UNIX, &now.timestamp().to_string());
        }

        if self.placeholders.nt_epoch {
            let nt = (now.timestamp() + NT_EPOCH_OFFSET_SECONDS) * 10_000_000;
            *filter = filter.replace(PLACEHOLDER_TIME_NT, &nt.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap()
    }

    #[test]
    fn escapes_filter_metacharacters() {
        assert_eq!(escape_filter_value("john*"), "john\\2a");
        assert_eq!(escape_filter_value("(admin)"), "\\28admin\\29");
        assert_eq!(escape_filter_value("a\\b"), "a\\5cb");
        assert_eq!(escape_filter_value("normal"), "normal");
    }

    #[test]
    fn escapes_reserved_input_characters() {
        assert_eq!(escape_input("a,b"), "a\\,b");
        assert_eq!(escape_input("a=b;c"), "a\\=b\\;c");
        assert_eq!(escape_input("<#+>"), "\\<\\#\\+\\>");
        assert_eq!(escape_input("he said \"hi\""), "he said \\\"hi\\\"");
        // Metacharacters still hex-escaped underneath.
        assert_eq!(escape_input("x(,)"), "x\\28\\,\\29");
    }

    #[test]
    fn first_rdn_honors_escaped_commas() {
        assert_eq!(first_rdn("cn=admins,ou=groups,dc=example,dc=com"), "cn=admins");
        assert_eq!(first_rdn("cn=a\\,b,ou=groups"), "cn=a\\,b");
        assert_eq!(first_rdn("cn=alone"), "cn=alone");
    }

    #[test]
    fn resolves_attribute_role_placeholders_completely() {
        let attributes = AttributeMap::default();
        let template = FilterTemplate::resolve(
            "(&(objectClass=person)({username_attribute}={input})({mail_attribute}=*))",
            &attributes,
        );

        assert_eq!(
            template.template(),
            "(&(objectClass=person)(uid={input})(mail=*))"
        );
        assert!(!template.template().contains("_attribute}"));
        assert!(template.placeholders().input);
        assert!(!template.placeholders().dn);
    }

    #[test]
    fn resolves_group_role_placeholders() {
        let attributes = AttributeMap::default();
        let template = FilterTemplate::resolve(
            "(&(objectClass=groupOfNames)({group_member_attribute}={dn}))",
            &attributes,
        );

        assert_eq!(
            template.template(),
            "(&(objectClass=groupOfNames)(member={dn}))"
        );
        assert!(template.placeholders().dn);
    }

    #[test]
    fn records_only_present_placeholders() {
        let attributes = AttributeMap::default();
        let template = FilterTemplate::resolve("(|{memberof:dn})", &attributes);

        let p = template.placeholders();
        assert!(p.member_of_dn);
        assert!(!p.member_of_rdn);
        assert!(!p.input);
        assert!(!p.username);
    }

    #[test]
    fn user_query_escapes_input() {
        let attributes = AttributeMap::default();
        let template = FilterTemplate::resolve("({username_attribute}={input})", &attributes);

        let filter = template.resolve_user_query("jo(h)n*", test_now());
        assert_eq!(filter, "(uid=jo\\28h\\29n\\2a)");
    }

    #[test]
    fn group_query_resolves_dn_and_username() {
        let attributes = AttributeMap::default();
        let template =
            FilterTemplate::resolve("(|(member={dn})(uid={username}))", &attributes);

        let filter = template.resolve_group_query(
            "john",
            "john",
            "cn=john (ext),dc=example,dc=com",
            &[],
            test_now(),
        );

        assert_eq!(
            filter,
            "(|(member=cn=john \\28ext\\29,dc=example,dc=com)(uid=john))"
        );
    }

    #[test]
    fn group_query_expands_member_of_terms() {
        let attributes = AttributeMap::default();
        let template = FilterTemplate::resolve("(|{memberof:dn})", &attributes);

        let member_of = vec![
            "cn=admins,ou=groups,dc=example,dc=com".to_string(),
            "cn=dev,ou=groups,dc=example,dc=com".to_string(),
        ];
        let filter = template.resolve_group_query("x", "x", "cn=x", &member_of, test_now());

        assert_eq!(
            filter,
            "(|(memberOf=cn=admins,ou=groups,dc=example,dc=com)(memberOf=cn=dev,ou=groups,dc=example,dc=com))"
        );
    }

    #[test]
    fn group_query_expands_member_of_rdn_terms() {
        let attributes = AttributeMap::default();
        let template = FilterTemplate::resolve("(|{memberof:rdn})", &attributes);

        let member_of = vec!["cn=admins,ou=groups,dc=example,dc=com".to_string()];
        let filter = template.resolve_group_query("x", "x", "cn=x", &member_of, test_now());

        assert_eq!(filter, "(|(memberOf=cn=admins))");
    }

    #[test]
    fn member_of_expansion_is_empty_for_empty_profile() {
        let attributes = AttributeMap::default();
        let template = FilterTemplate::resolve("(|{memberof:dn})", &attributes);

        let filter = template.resolve_group_query("x", "x", "cn=x", &[], test_now());
        assert_eq!(filter, "(|)");
    }

    #[test]
    fn substitutes_time_placeholders() {
        let attributes = AttributeMap::default();

        let template = FilterTemplate::resolve(
            "(&(uid={input})(expires>={date-time:generalized}))",
            &attributes,
        );
        let filter = template.resolve_user_query("jdoe", test_now());
        assert_eq!(filter, "(&(uid=jdoe)(expires>=20240301123045Z))");

        let template =
            FilterTemplate::resolve("(loginTime>={date-time:unix-epoch})", &attributes);
        let filter = template.resolve_user_query("jdoe", test_now());
        assert_eq!(filter, format!("(loginTime>={})", test_now().timestamp()));

        let template =
            FilterTemplate::resolve("(accountExpires>={date-time:microsoft-nt})", &attributes);
        let filter = template.resolve_user_query("jdoe", test_now());
        let expected = (test_now().timestamp() + 11_644_473_600) * 10_000_000;
        assert_eq!(filter, format!("(accountExpires>={expected})"));
    }
}
