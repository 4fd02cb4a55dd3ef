//! Error types for pgnotifier.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! failing stage: connecting/listening, decoding a payload, or internal state.

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::transport::Transport) or one of its
/// connections.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("LISTEN on channel '{channel}' failed: {message}")]
    ListenFailed {
        channel: String,
        message: String,
    },

    #[error("Connection is closed")]
    Closed,

    #[error("Event stream already taken from this connection")]
    EventsTaken,

    #[error("Payload of {size} bytes exceeds the {limit} byte notification limit")]
    PayloadTooLarge {
        size: usize,
        limit: usize,
    },
}

/// Errors raised while decoding a raw notification payload.
#[derive(Debug, Clone, PartialEq, Error)]
#[allow(missing_docs)]
pub enum DecodeError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax {
        offset: usize,
        message: String,
    },

    #[error("Unexpected end of payload")]
    UnexpectedEnd,

    #[error("Unsupported literal: {literal}")]
    Unsupported {
        literal: String,
    },

    #[error("Payload nesting exceeds depth {limit}")]
    TooDeep {
        limit: usize,
    },

    #[error("Invalid JSON payload: {message}")]
    Json {
        message: String,
    },
}

impl DecodeError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }
}

/// Top-level error type for pgnotifier.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum NotifierError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl NotifierError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is a decode error.
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if retrying the failed call may succeed.
    ///
    /// Only connection failures qualify; a bad payload decodes the same way twice.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => matches!(e, TransportError::ConnectionFailed { .. } | TransportError::Closed),
            Self::Decode(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for pgnotifier operations.
pub type NotifierResult<T> = Result<T, NotifierError>;
