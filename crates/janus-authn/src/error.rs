//! Authentication error taxonomy.
//!
//! ## Security Note
//!
//! Error messages must not leak credentials. The taxonomy is deliberately
//! coarse so HTTP handlers can branch on the category without inspecting
//! backend-specific detail.

use thiserror::Error;

/// Errors surfaced by identity backends.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// The user does not exist, or is disabled/filtered out by the backend.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The supplied password does not match the stored credential.
    #[error("incorrect password")]
    IncorrectPassword,

    /// The backend rejected a new password on policy grounds.
    #[error("password rejected by policy: {0}")]
    PasswordWeak(String),

    /// Any other backend failure: network, protocol, encoding.
    #[error("backend operation failed: {0}")]
    OperationFailed(String),

    /// A misconfiguration discovered only at runtime, such as an ambiguous
    /// attribute mapping.
    #[error("backend configuration error: {0}")]
    Configuration(String),
}

impl AuthenticationError {
    /// Creates a user not found error.
    #[must_use]
    pub fn user_not_found(username: impl Into<String>) -> Self {
        Self::UserNotFound(username.into())
    }

    /// Creates a weak-password error.
    #[must_use]
    pub fn password_weak(msg: impl Into<String>) -> Self {
        Self::PasswordWeak(msg.into())
    }

    /// Creates an operation failure.
    #[must_use]
    pub fn operation(msg: impl Into<String>) -> Self {
        Self::OperationFailed(msg.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Checks if this error means the credential was rejected.
    #[must_use]
    pub const fn is_credential_error(&self) -> bool {
        matches!(self, Self::IncorrectPassword | Self::PasswordWeak(_))
    }

    /// Checks if this is a user not found error.
    #[must_use]
    pub const fn is_user_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound(_))
    }

    /// Checks if this error is fatal for the request but not for the backend.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}

/// Result type for identity backend operations.
pub type AuthenticationResult<T> = Result<T, AuthenticationError>;
