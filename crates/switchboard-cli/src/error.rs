//! Binary error type.

use switchboard_app::StoreError;
use switchboard_client::ApiError;
use switchboard_core::CredentialError;
use thiserror::Error;

/// Why the console exited unsuccessfully.
#[derive(Debug, Error)]
pub enum CliError {
    /// The token is not a usable credential.
    #[error("invalid token: {0}")]
    Credential(#[from] CredentialError),

    /// The engine could not be built from the endpoints.
    #[error("invalid endpoint configuration: {0}")]
    Config(#[from] ApiError),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The server ended the session (credential rejected).
    #[error("session ended by the server")]
    SessionEnded,

    /// Installing the Ctrl-C handler failed.
    #[error("signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}
