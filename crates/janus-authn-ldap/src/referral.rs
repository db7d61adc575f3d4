//! Referral handling.
//!
//! A referral response redirects the client to another server for the same
//! operation. Chasing is an explicit sequential loop at the call sites: for
//! each referral URL a dedicated client is dialed against the referred
//! server, the identical operation is repeated, and search entries are
//! merged into the accumulated result, deduplicated by DN. Any chase
//! failure aborts the whole request; a partial merge is never returned as
//! success.

use ldap3::SearchEntry;

use crate::config::DirectoryAddress;
use crate::error::{LdapError, LdapResult};

/// LDAP result code for a referral response.
pub const RC_REFERRAL: u32 = 10;

/// Extracts the target address from a referral URL.
///
/// Referral URLs may carry a DN and search parts
/// (`ldap://host:port/dn??sub?filter`); only the scheme, host and port are
/// used, since the operation is repeated unchanged.
pub fn referral_address(referral: &str) -> LdapResult<DirectoryAddress> {
    DirectoryAddress::parse(referral)
        .map_err(|e| LdapError::referral(referral, format!("unusable referral URL: {e}")))
}

/// Merges chased entries into the accumulated result, deduplicating by DN.
///
/// The primary result's order is preserved; chased entries append in
/// arrival order.
pub fn merge_entries(accumulated: &mut Vec<SearchEntry>, chased: Vec<SearchEntry>) {
    for entry in chased {
        if !accumulated.iter().any(|existing| existing.dn == entry.dn) {
            accumulated.push(entry);
        }
    }
}
