//! Store error types.

use switchboard_client::ApiError;
use switchboard_proto::ConversationId;
use thiserror::Error;

/// Failures surfaced by store operations.
///
/// Every variant leaves the store exactly as it was before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The conversation list could not be loaded.
    #[error("could not load conversations: {source}")]
    Load {
        /// Underlying REST failure
        source: ApiError,
    },

    /// The conversation is not listed, even after a refresh.
    #[error("conversation {id} not found")]
    NotFound {
        /// Requested conversation
        id: ConversationId,
    },

    /// The conversation could not be fetched.
    #[error("could not open conversation {id}: {source}")]
    Fetch {
        /// Requested conversation
        id: ConversationId,
        /// Underlying REST failure
        source: ApiError,
    },

    /// The message could not be sent.
    #[error("could not send message to conversation {id}: {source}")]
    Send {
        /// Target conversation
        id: ConversationId,
        /// Underlying REST failure
        source: ApiError,
    },

    /// The session ended or changed while the request was in flight; the
    /// response was discarded.
    #[error("session changed while the request was in flight")]
    SessionChanged,
}

impl StoreError {
    /// Underlying REST failure, if any.
    pub fn cause(&self) -> Option<&ApiError> {
        match self {
            Self::Load { source } | Self::Fetch { source, .. } | Self::Send { source, .. } => {
                Some(source)
            },
            Self::NotFound { .. } | Self::SessionChanged => None,
        }
    }

    /// Whether the failure was an authentication failure (session ended).
    pub fn is_unauthorized(&self) -> bool {
        self.cause().is_some_and(ApiError::is_unauthorized)
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        self.cause().is_some_and(ApiError::is_transient)
    }
}
