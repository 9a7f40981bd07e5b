//! A client-side SSH channel multiplexing engine.
//!
//! This crate implements the RFC 4254 connection-protocol layer that sits
//! above an already-authenticated transport: opening `session` channels,
//! running a single-threaded `poll(2)`-driven event loop over the
//! transport socket plus every channel's host-side file descriptors, and
//! handling the data/window-adjust/close bookkeeping each channel needs.
//!
//! Key exchange, authentication, and the wire cipher/MAC are out of
//! scope; see [`transport::Transport`] for the seam between this crate
//! and that layer.

mod buffer;
mod channel;
mod engine;
mod error;
mod limits;
mod pollset;
mod reader;
mod transport;
mod wire;

pub use buffer::ByteBuffer;
pub use channel::{
    Channel, ChannelConfig, ChannelHandler, ChannelStatus, ChannelType, SessionConfig,
    DEFAULT_MAX_PACKET, DEFAULT_WINDOW,
};
pub use engine::ChannelEngine;
pub use error::{Error, Result};
pub use limits::EngineLimits;
pub use pollset::Interest;
pub use transport::{FlushOutcome, Transport};

pub use filedescriptor::SocketDescriptor;
