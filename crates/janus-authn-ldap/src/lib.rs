//! # janus-authn-ldap
//!
//! Directory (LDAP) authentication provider for the Janus gateway.
//!
//! This crate implements the `janus-authn` backend contract against an
//! LDAP v3 directory using `ldap3`: capability discovery against the root
//! DSE, templated search filters with injection-safe substitution, two
//! group-resolution strategies, referral chasing, and capability-dependent
//! password mutation.
//!
//! ## Security
//!
//! - All request input is escaped before it is spliced into a filter.
//! - Passwords and bind credentials are never logged.
//! - Per-user binds use dedicated connections that are never pooled.

#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(missing_docs)]

pub mod config;
pub mod connection;
pub mod error;
pub mod features;
pub mod filter;
pub mod groups;
pub mod password;
pub mod profile;
pub mod provider;
pub mod referral;

pub use config::{LdapConfig, LdapImplementation};
pub use error::{LdapError, LdapResult};
pub use features::SupportedFeatures;
pub use provider::LdapUserBackend;
