//! ASR client error taxonomy.
//!
//! Named status codes for provider-reported errors, mirroring the way the
//! Doubao/DashScope clients expose a `status_code` module of constants
//! alongside their error enum rather than leaving magic numbers in match
//! arms.

use thiserror::Error;

/// Provider error codes carried by `Error` frames on the wire.
pub mod status_code {
    /// Authentication rejected (bad or expired API key).
    pub const AUTH_ERROR: i32 = 4001;
    /// Request malformed or missing required fields.
    pub const BAD_REQUEST: i32 = 4002;
    /// Provider-side rate limit hit.
    pub const RATE_LIMIT: i32 = 4029;
    /// Provider internal error; safe to retry.
    pub const SERVER_ERROR: i32 = 5000;
    /// Session already terminated on the provider side.
    pub const SESSION_GONE: i32 = 4003;
}

pub type Result<T> = std::result::Result<T, AsrError>;

#[derive(Debug, Error)]
pub enum AsrError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("asr server error {code}: {message}")]
    AsrServer { code: i32, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("send timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0} reconnect attempts exhausted")]
    ReconnectExhausted(u32),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("send failed: {0}")]
    SendFailed(String),
}

impl AsrError {
    pub fn asr_server(code: i32, message: impl Into<String>) -> Self {
        AsrError::AsrServer {
            code,
            message: message.into(),
        }
    }

    /// Whether a connection attempt that failed with this error is worth
    /// retrying under the Reconnect Protocol's backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            AsrError::Transport(_) | AsrError::Timeout(_) => true,
            AsrError::AsrServer { code, .. } => {
                *code == status_code::SERVER_ERROR || *code == status_code::RATE_LIMIT
            }
            AsrError::Protocol(_) | AsrError::Config(_) | AsrError::Json(_) => false,
            AsrError::ReconnectExhausted(_) => false,
            AsrError::SendFailed(_) => true,
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            AsrError::AsrServer { code, .. } if *code == status_code::AUTH_ERROR
        )
    }
}
