//! The contract this engine needs from the transport/crypto layer.
//!
//! Everything below this trait — key exchange, cipher and MAC
//! installation, packet encryption and integrity — is out of scope for
//! this crate (see spec §1) and is assumed to already be in place by the
//! time a [`Transport`] reaches [`crate::engine::ChannelEngine::run`].
//! The engine only ever calls through this contract.

use crate::buffer::ByteBuffer;
use crate::error::Result;
use filedescriptor::SocketDescriptor;

/// The outcome of a non-blocking flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// All pending output was pushed to the wire.
    Flushed,
    /// The socket isn't ready for more output yet (`EWOULDBLOCK`); this is
    /// benign and the loop should simply try again once `poll` reports
    /// writability.
    WouldBlock,
}

/// The transport/connection layer's contract with the channel engine.
///
/// Implementations own key exchange, ciphers, and MACs; the engine only
/// ever asks for a packet buffer to fill, hands it back to be encrypted
/// and enqueued, and asks to flush or receive.
pub trait Transport {
    /// Allocate a writable buffer for one outbound packet, with its
    /// message-type slot already reserved by the caller (the engine
    /// writes the type byte itself via [`crate::wire`]'s `encode_*`
    /// helpers).
    fn new_packet(&mut self) -> Result<ByteBuffer>;

    /// Finalize `packet` (MAC, encrypt) and enqueue it for sending.
    /// Does not necessarily push bytes to the wire; see
    /// [`Self::send_flush`].
    fn send_packet(&mut self, packet: ByteBuffer) -> Result<()>;

    /// Attempt to push any enqueued output to the wire without blocking.
    fn send_flush(&mut self) -> Result<FlushOutcome>;

    /// Whether there is enqueued output still waiting to be flushed.
    fn send_is_pending(&self) -> bool;

    /// Attempt to receive and decrypt one inbound packet without
    /// blocking. `Ok(None)` is the `EWOULDBLOCK` case: no complete
    /// packet is available yet, which is not an error and is the engine's
    /// signal to resume polling.
    fn recv_packet(&mut self) -> Result<Option<ByteBuffer>>;

    /// The raw pollable socket backing this transport.
    fn as_socket_descriptor(&self) -> SocketDescriptor;

    /// Switch the underlying socket between blocking and non-blocking
    /// mode. The engine calls this once, with `true`, before entering its
    /// event loop.
    fn set_non_blocking(&mut self, non_blocking: bool) -> Result<()>;
}
