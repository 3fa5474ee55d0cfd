use thiserror::Error;

pub type FbedResult<T> = Result<T, FbedError>;

#[derive(Debug, Error)]
pub enum FbedError {
    #[error("path escapes the store root: {0}")]
    PathEscape(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("path is occupied by a folder: {0}")]
    IsAFolder(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote error (code {code}): {message}")]
    RemoteProtocol { code: i32, message: String },

    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("token error: {0}")]
    Token(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FbedError {
    /// Transport failures and non-success envelopes may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FbedError::Transport(_) | FbedError::RemoteProtocol { .. }
        )
    }
}
