//! Identity backend trait.
//!
//! This is the contract the gateway's session layer consumes. Backends
//! validate credentials and answer attribute queries; they make no
//! authorization decisions.
//!
//! ## Implementation Notes
//!
//! - Backends must be thread-safe (Send + Sync); the gateway issues
//!   concurrent requests against one shared instance.
//! - All operations are async to support network I/O.
//! - `startup_check` failures are fatal: the gateway refuses to serve with
//!   a backend that cannot reach its store.

use crate::error::AuthenticationResult;
use crate::profile::{ExtendedUserDetails, UserDetails};

/// Trait implemented by every identity backend.
#[allow(async_fn_in_trait)]
pub trait UserBackend: Send + Sync {
    /// Returns the backend type identifier, used in logs and diagnostics.
    fn backend_type(&self) -> &'static str;

    /// Validates a password credential.
    ///
    /// Returns `Ok(true)` when the password matches, `Ok(false)` when the
    /// backend rejected the credential, and an error for any failure that
    /// prevented a definite answer.
    ///
    /// ## Security
    ///
    /// The password must never be logged or stored by implementations.
    async fn check_password(&self, username: &str, password: &str)
        -> AuthenticationResult<bool>;

    /// Fetches the basic details for a user.
    async fn get_details(&self, username: &str) -> AuthenticationResult<UserDetails>;

    /// Fetches the extended details for a user.
    async fn get_extended_details(
        &self,
        username: &str,
    ) -> AuthenticationResult<ExtendedUserDetails>;

    /// Sets a user's password without knowledge of the old one
    /// (administrative reset).
    async fn update_password(&self, username: &str, new_password: &str)
        -> AuthenticationResult<()>;

    /// Changes a user's password, validating the old one first.
    async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> AuthenticationResult<()>;

    /// Probes the backend at startup: connectivity plus whatever
    /// capability discovery the backend needs before serving.
    async fn startup_check(&self) -> AuthenticationResult<()>;

    /// Releases backend resources (connection pools, file handles).
    async fn close(&self) -> AuthenticationResult<()>;
}
