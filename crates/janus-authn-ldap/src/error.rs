//! LDAP-specific error types.
//!
//! ## Security Note
//!
//! Error messages carry the operation, target address and (non-secret)
//! username for diagnostics; they must never carry passwords or bind
//! credentials. The directory result code is preserved where callers need
//! to branch on it.

use janus_authn::AuthenticationError;
use thiserror::Error;

/// LDAP-specific errors.
#[derive(Debug, Error)]
pub enum LdapError {
    /// Invalid configuration.
    #[error("ldap configuration error: {0}")]
    Configuration(String),

    /// Connecting to the directory failed.
    #[error("connection to {address} failed: {message}")]
    Connection {
        /// Target address.
        address: String,
        /// Underlying failure.
        message: String,
    },

    /// Bind (authentication) against the directory failed.
    #[error("bind against {address} failed: {message}")]
    Bind {
        /// Target address.
        address: String,
        /// Underlying failure.
        message: String,
    },

    /// The user supplied an invalid credential (directory result code 49).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A directory operation returned a non-success result code.
    #[error("{operation} against {address} failed with result code {rc}: {message}")]
    Operation {
        /// Operation name.
        operation: &'static str,
        /// Target address.
        address: String,
        /// Directory result code.
        rc: u32,
        /// Diagnostic message from the server.
        message: String,
    },

    /// A referral chase failed against the referred server.
    #[error("referral chase to {address} failed: {message}")]
    Referral {
        /// Referred server address or URL.
        address: String,
        /// Underlying failure.
        message: String,
    },

    /// The directory rejected a new password on policy grounds.
    #[error("password rejected by directory policy (result code {rc}): {message}")]
    PasswordPolicy {
        /// Directory result code.
        rc: u32,
        /// Diagnostic message from the server.
        message: String,
    },

    /// No user entry matched the search.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// More than one entry matched a lookup that requires a unique result.
    #[error("ambiguous directory result for {username}: {message}")]
    Ambiguous {
        /// Username used for the lookup.
        username: String,
        /// What was ambiguous.
        message: String,
    },

    /// A directory entry cannot be mapped to a profile.
    #[error("attribute mapping error: {0}")]
    AttributeMapping(String),

    /// Feature discovery has not run yet.
    #[error("provider is not initialized")]
    NotInitialized,

    /// Connection pool is closed or exhausted.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Underlying protocol error.
    #[error("ldap protocol error: {0}")]
    Protocol(#[from] ldap3::LdapError),
}

impl LdapError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a connection error for the given address.
    #[must_use]
    pub fn connection(address: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Connection {
            address: address.into(),
            message: msg.into(),
        }
    }

    /// Creates a bind error for the given address.
    #[must_use]
    pub fn bind(address: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Bind {
            address: address.into(),
            message: msg.into(),
        }
    }

    /// Creates an attribute mapping error.
    #[must_use]
    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::AttributeMapping(msg.into())
    }

    /// Creates a referral chase error naming the referred server.
    #[must_use]
    pub fn referral(address: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Referral {
            address: address.into(),
            message: msg.into(),
        }
    }

    /// Checks if this is a connection-related error.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::PoolExhausted | Self::Protocol(_)
        )
    }

    /// Checks if this is a user not found error.
    #[must_use]
    pub const fn is_user_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound(_))
    }
}

/// Result type for LDAP operations.
pub type LdapResult<T> = Result<T, LdapError>;

impl From<LdapError> for AuthenticationError {
    fn from(err: LdapError) -> Self {
        match err {
            LdapError::Configuration(msg) => Self::Configuration(msg),
            LdapError::Ambiguous { .. } | LdapError::AttributeMapping(_) => {
                Self::Configuration(err.to_string())
            }
            LdapError::UserNotFound(username) => Self::UserNotFound(username),
            LdapError::InvalidCredentials => Self::IncorrectPassword,
            LdapError::PasswordPolicy { .. } => Self::PasswordWeak(err.to_string()),
            LdapError::Connection { .. }
            | LdapError::Bind { .. }
            | LdapError::Operation { .. }
            | LdapError::Referral { .. }
            | LdapError::NotInitialized
            | LdapError::PoolExhausted
            | LdapError::Protocol(_) => Self::OperationFailed(err.to_string()),
        }
    }
}
