//! Structured error type shared by every module in this crate.
//!
//! `EWOULDBLOCK`/`EAGAIN` are deliberately *not* represented here: they are
//! the control signal that tells the event loop to go back to `poll`, not a
//! failure. See [`crate::transport::Transport`] for how that distinction is
//! surfaced instead.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("buffer overflow: {0}")]
    BufferOverflow(String),

    #[error("malformed wire data: {0}")]
    WireMalformed(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transport closed")]
    TransportEof,

    #[error("transport I/O error: {0}")]
    TransportIo(#[from] std::io::Error),

    #[error("too many watched file descriptors: {0}")]
    TooManyFds(String),

    #[error("unsupported channel type: {0}")]
    UnsupportedChannelType(String),
}

impl Error {
    pub(crate) fn wire(msg: impl Into<String>) -> Error {
        Error::WireMalformed(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Error {
        Error::ProtocolViolation(msg.into())
    }
}
