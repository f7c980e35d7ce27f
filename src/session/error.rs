use thiserror::Error;

/// Failure of a single-flight token refresh, shared by every request that
/// was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("session expired: {0}")]
    Rejected(String),

    #[error("token refresh was abandoned")]
    Abandoned,
}

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("not authenticated")]
    Unauthorized,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("decoding response: {0}")]
    Decode(String),

    #[error("encoding request: {0}")]
    Encode(String),

    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the user has to sign in again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::Refresh(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Encode(err.to_string())
    }
}
