use std::fmt;

/// Result of trying to pull one complete protocol frame out of a [`crate::codec::framing::FramingBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes buffered yet; caller should return to the read loop.
    NeedMore,
    /// The buffer cannot hold any more bytes without exceeding its cap.
    BufferOverflow,
    /// Bytes were consumed but did not form a well-formed frame.
    Malformed(&'static str),
    /// 1024 consecutive resync bytes were skipped without finding a valid AVL preamble.
    ResyncExhausted,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::NeedMore => write!(f, "need more bytes"),
            FrameError::BufferOverflow => write!(f, "framing buffer overflow"),
            FrameError::Malformed(reason) => write!(f, "malformed frame: {reason}"),
            FrameError::ResyncExhausted => write!(f, "resync exhausted after 1024 bytes"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Terminal reasons a [`crate::session::Session`] closes a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionClose {
    UnknownDevice,
    BadHandshake,
    ProtocolError,
    BufferOverflow,
    IdleTimeout,
    SocketWriteFail,
    Replaced,
    Shutdown,
}

impl fmt::Display for SessionClose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionClose::UnknownDevice => "unknown_device",
            SessionClose::BadHandshake => "bad_handshake",
            SessionClose::ProtocolError => "protocol_error",
            SessionClose::BufferOverflow => "buffer_overflow",
            SessionClose::IdleTimeout => "idle_timeout",
            SessionClose::SocketWriteFail => "socket_write_fail",
            SessionClose::Replaced => "replaced_by_reconnect",
            SessionClose::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}

/// Errors a [`crate::repository::Repository`] implementation may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    NotFound,
    /// A retryable failure (network blip, lock contention, ...).
    Transient(String),
    /// A non-retryable failure. Treated as transient at runtime per spec (only
    /// fatal during startup), but kept distinct so callers can tell the two apart.
    Fatal(String),
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::NotFound => write!(f, "device not found"),
            RepositoryError::Transient(msg) => write!(f, "transient store error: {msg}"),
            RepositoryError::Fatal(msg) => write!(f, "fatal store error: {msg}"),
        }
    }
}

impl std::error::Error for RepositoryError {}
