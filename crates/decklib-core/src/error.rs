//! Error types for decklib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, framing and decode
//! problems on the read path, and command submission failures are all
//! captured here.

/// The error type for all decklib operations.
///
/// Errors raised on the read/dispatch path ([`Framing`](Error::Framing),
/// [`Protocol`](Error::Protocol), [`Unhandled`](Error::Unhandled),
/// [`UnknownSlot`](Error::UnknownSlot)) are reported and the offending
/// message is skipped. Only [`ConnectionLost`](Error::ConnectionLost) ends a
/// session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP socket setup, address resolution).
    #[error("transport error: {0}")]
    Transport(String),

    /// A message boundary or status line could not be interpreted: an empty
    /// or non-numeric status line, a missing label, or a body line without
    /// the `key: value` separator.
    #[error("framing error: {0}")]
    Framing(String),

    /// A well-framed message carried a value that could not be decoded
    /// (for example a non-numeric `slot count`).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A well-framed message whose status code range or label has no decoder.
    #[error("unhandled message: {code} {label}")]
    Unhandled {
        /// Numeric status code of the message.
        code: u16,
        /// Free-text label following the code.
        label: String,
    },

    /// A slot info message referenced a slot id that does not exist yet.
    #[error("unknown slot id: {0}")]
    UnknownSlot(u32),

    /// The deck answered a command with a failure reply (1xx status code).
    #[error("command failed: {code} {label}")]
    CommandFailed {
        /// Numeric failure code returned by the deck.
        code: u16,
        /// Failure description returned by the deck.
        label: String,
    },

    /// Timed out waiting for a reply from the deck.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed to a command builder or submission.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The transport has been closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the deck was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A command was submitted after the session reached the closed state.
    #[error("session closed")]
    SessionClosed,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ends the session when raised on the read path.
    ///
    /// Everything else is reported and the offending message is skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost | Error::NotConnected | Error::Io(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
