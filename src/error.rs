//! Error types for the assistant client

use std::fmt;

use thiserror::Error;

/// Result type alias for assistant client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status attached to a failed exchange with the assistant service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportStatus {
    /// Remote endpoint is temporarily unreachable or overloaded
    Unavailable,
    /// The exchange did not finish before the configured deadline
    DeadlineExceeded,
    /// Credentials were rejected
    Unauthenticated,
    /// Credentials were accepted but lack permission
    PermissionDenied,
    /// The service rejected the request as malformed
    InvalidArgument,
    /// The exchange was cancelled locally
    Cancelled,
    /// The service or transport failed internally
    Internal,
    /// Anything that doesn't map onto a known status
    Unknown,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission denied",
            Self::InvalidArgument => "invalid argument",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Failure of the streaming exchange with the assistant service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport {status}: {message}")]
pub struct TransportError {
    /// Classified status
    pub status: TransportStatus,
    /// Human readable detail
    pub message: String,
}

impl TransportError {
    /// Create a transport error with the given status
    pub fn new(status: TransportStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Shorthand for an `Unavailable` error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TransportStatus::Unavailable, message)
    }

    /// Whether the remote endpoint is only transiently unavailable
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.status == TransportStatus::Unavailable
    }
}

/// Errors that can occur in the assistant client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing identity, bad values)
    #[error("configuration error: {0}")]
    Config(String),

    /// Credential loading or refresh error
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Audio device or file error
    #[error("audio error: {0}")]
    Audio(String),

    /// Exchange failure before it was attributed to a turn
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A conversation turn failed and will not be retried further
    #[error("turn failed after {attempts} attempt(s): {source}")]
    Turn {
        /// Number of attempts made, including the failed one
        attempts: u32,
        /// Last transport error, unchanged
        source: TransportError,
    },

    /// Device registration was rejected
    #[error("device registration failed: {0}")]
    Registration(String),

    /// Device action payload could not be interpreted
    #[error("device action error: {0}")]
    DeviceAction(String),

    /// Display sink error
    #[error("display error: {0}")]
    Display(String),

    /// Wake word listener error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// The transport error behind this error, if any
    #[must_use]
    pub const fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) | Self::Turn { source: e, .. } => Some(e),
            _ => None,
        }
    }
}
