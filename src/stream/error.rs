use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("no authentication token found")]
    MissingCredential,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("stream request failed: {0}")]
    Transport(String),

    #[error("stream ended before a terminal frame")]
    Interrupted,
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}
