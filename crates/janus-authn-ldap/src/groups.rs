//! Group membership resolution.
//!
//! Two mutually exclusive strategies produce a flat group-name list. In
//! filter mode the groups search itself selects the user's groups. In
//! member-of mode the search result is treated as a candidate set and each
//! candidate's DN is cross-checked in code against the member-of values
//! retrieved with the user profile, because some directory schemas return
//! stale or over-broad results for member-of style queries.
//!
//! Malformed individual entries are logged and skipped, never fatal.

use ldap3::SearchEntry;
use tracing::warn;

use crate::config::GroupSearchMode;

/// Extracts group names from a groups search result.
///
/// `member_of` is the user profile's member-of list, consulted only in
/// [`GroupSearchMode::MemberOf`]. The returned list is deduplicated and
/// preserves first-seen order.
#[must_use]
pub fn resolve_group_names(
    mode: GroupSearchMode,
    entries: &[SearchEntry],
    member_of: &[String],
    group_name_attribute: &str,
) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(entries.len());

    for entry in entries {
        if mode == GroupSearchMode::MemberOf
            && !member_of.iter().any(|dn| dn.eq_ignore_ascii_case(&entry.dn))
        {
            warn!(
                dn = %entry.dn,
                "skipping group entry absent from the user's member-of list"
            );
            continue;
        }

        let Some(name) = single_group_name(entry, group_name_attribute) else {
            continue;
        };

        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }

    names
}

/// Returns the group name when the attribute holds exactly one value.
fn single_group_name<'a>(entry: &'a SearchEntry, attribute: &str) -> Option<&'a str> {
    match entry.attrs.get(attribute).map(Vec::as_slice) {
        Some([name]) => Some(name.as_str()),
        Some([]) | None => {
            warn!(
                dn = %entry.dn,
                attribute,
                "skipping group entry with no group name value"
            );
            None
        }
        Some(values) => {
            warn!(
                dn = %entry.dn,
                attribute,
                count = values.len(),
                "skipping group entry with multiple group name values"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn group(dn: &str, names: &[&str]) -> SearchEntry {
        let mut attrs = HashMap::new();
        if !names.is_empty() {
            attrs.insert(
                "cn".to_string(),
                names.iter().map(|n| (*n).to_string()).collect(),
            );
        }
        SearchEntry {
            dn: dn.to_string(),
            attrs,
            bin_attrs: HashMap::new(),
        }
    }

    #[test]
    fn filter_mode_extracts_all_single_valued_names() {
        let entries = vec![
            group("cn=admins,ou=groups,dc=example,dc=com", &["admins"]),
            group("cn=dev,ou=groups,dc=example,dc=com", &["dev"]),
        ];

        let names = resolve_group_names(GroupSearchMode::Filter, &entries, &[], "cn");
        assert_eq!(names, vec!["admins".to_string(), "dev".to_string()]);
    }

    #[test]
    fn zero_or_multiple_name_values_are_skipped() {
        let entries = vec![
            group("cn=empty,ou=groups,dc=example,dc=com", &[]),
            group("cn=twice,ou=groups,dc=example,dc=com", &["a", "b"]),
            group("cn=ok,ou=groups,dc=example,dc=com", &["ok"]),
        ];

        let names = resolve_group_names(GroupSearchMode::Filter, &entries, &[], "cn");
        assert_eq!(names, vec!["ok".to_string()]);
    }

    #[test]
    fn member_of_mode_drops_entries_outside_member_of_list() {
        let entries = vec![
            group("cn=admins,ou=groups,dc=example,dc=com", &["admins"]),
            group("cn=stale,ou=groups,dc=example,dc=com", &["stale"]),
        ];
        let member_of = vec!["cn=admins,ou=groups,dc=example,dc=com".to_string()];

        let names = resolve_group_names(GroupSearchMode::MemberOf, &entries, &member_of, "cn");
        assert_eq!(names, vec!["admins".to_string()]);
    }

    #[test]
    fn member_of_cross_check_ignores_case() {
        let entries = vec![group("CN=Admins,OU=Groups,DC=example,DC=com", &["Admins"])];
        let member_of = vec!["cn=admins,ou=groups,dc=example,dc=com".to_string()];

        let names = resolve_group_names(GroupSearchMode::MemberOf, &entries, &member_of, "cn");
        assert_eq!(names, vec!["Admins".to_string()]);
    }

    #[test]
    fn duplicate_names_are_deduplicated_in_order() {
        let entries = vec![
            group("cn=dev,ou=a,dc=example,dc=com", &["dev"]),
            group("cn=admins,ou=a,dc=example,dc=com", &["admins"]),
            group("cn=dev,ou=b,dc=example,dc=com", &["dev"]),
        ];

        let names = resolve_group_names(GroupSearchMode::Filter, &entries, &[], "cn");
        assert_eq!(names, vec!["dev".to_string(), "admins".to_string()]);
    }

    #[test]
    fn empty_result_yields_empty_list() {
        let names = resolve_group_names(GroupSearchMode::Filter, &[], &[], "cn");
        assert!(names.is_empty());
    }
}
