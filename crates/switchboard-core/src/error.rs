//! Core error types.

use thiserror::Error;

/// Errors from constructing a session credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Token was empty or whitespace only.
    #[error("credential token is empty")]
    Empty,

    /// Token contains characters that cannot appear in an HTTP header.
    #[error("credential token contains {0:?}, which is not allowed in a header")]
    InvalidCharacter(char),
}
