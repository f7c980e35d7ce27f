use thiserror::Error;

use crate::{session::ApiError, stream::StreamError};

/// Failures surfaced by the orchestrator, also kept in its `error` field.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("no conversation selected")]
    NoConversationSelected,

    #[error("an action is waiting for confirmation")]
    ConfirmationPending,

    #[error("no action is waiting for confirmation")]
    NotGated,

    /// Reported by the backend in an `error` frame
    #[error("{0}")]
    Backend(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl ChatError {
    /// True when the user has to sign in again.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            ChatError::Api(err) => err.is_auth_failure(),
            ChatError::Stream(err) => matches!(
                err,
                StreamError::MissingCredential | StreamError::Http { status: 401, .. }
            ),
            _ => false,
        }
    }
}
