//! Error types.

use thiserror::Error;

/// Recoverable network failure reported on a listener's event stream.
///
/// Safe to ignore; the session drives its own reconnection through the
/// close path.
#[derive(Debug, Clone, Error)]
#[error("socket error: {reason}")]
pub struct SocketError {
    /// Description of the underlying transport failure.
    pub reason: String,
}

impl SocketError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure tied to a single message or receive operation.
///
/// Non-recoverable for that message, but never fatal to the session.
#[derive(Debug, Clone, Error)]
pub enum MessageError {
    /// The payload could not be decoded with the configured encoding.
    #[error("unable to decode message: {reason}")]
    Decode { reason: String },

    /// A receive gave up waiting for a message.
    #[error("receive timed out")]
    Timeout {
        /// Last socket error seen before the deadline, if any.
        source: Option<SocketError>,
    },

    /// A receive was cancelled by the caller.
    #[error("receive cancelled")]
    Cancelled {
        /// Last socket error seen before the cancellation, if any.
        source: Option<SocketError>,
    },
}

/// Errors carried by [`ListenerEvent::Error`](crate::ListenerEvent::Error).
#[derive(Debug, Clone, Error)]
pub enum ListenerError {
    /// Recoverable transport failure; the session keeps retrying.
    #[error(transparent)]
    Socket(#[from] SocketError),

    /// A message failed to decode; the connection stays up.
    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Crate level error type.
#[derive(Debug, Error)]
pub enum BuoyError {
    /// Invalid options, raised before any network activity.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Transport failure.
    #[error(transparent)]
    Socket(#[from] SocketError),

    /// Message level failure (decode, timeout, cancellation).
    #[error(transparent)]
    Message(#[from] MessageError),

    /// The relay could not deliver the message within the requested wait.
    #[error("unable to deliver message")]
    DeliveryFailed,

    /// The relay rejected or expired the send request.
    #[error("request cancelled")]
    RequestCancelled,

    /// The relay answered a send with an unexpected status code.
    #[error("unexpected status code {0}")]
    UnexpectedStatus(u16),

    /// HTTP request failed before a response was received.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using [`BuoyError`].
pub type BuoyResult<T> = Result<T, BuoyError>;
